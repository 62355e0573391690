use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "story-archiver")]
#[command(about = "Export stories and private documents for offline reading")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// RON config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory the finished file is written to
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Skip cover art
    #[arg(long, global = true)]
    pub no_cover: bool,

    /// Also write the log to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Package a multi-chapter story as an e-book
    Story {
        /// Story id or any chapter url
        target: String,
    },
    /// Save one private document as Markdown
    Document {
        id: String,
        /// Title used for the heading and file name
        #[arg(long)]
        title: Option<String>,
    },
    /// Bundle private documents into one archive; all listed documents when no ids are given
    Documents { ids: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn story_accepts_url_and_global_flags() {
        let cli = Cli::try_parse_from([
            "story-archiver",
            "story",
            "https://www.example.net/s/42/3/",
            "--no-cover",
            "-o",
            "out",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Command::Story {
                target: "https://www.example.net/s/42/3/".to_string()
            }
        );
        assert!(cli.no_cover);
        assert_eq!(cli.output, Some(PathBuf::from("out")));
        assert!(!cli.verbose);
    }

    #[test]
    fn documents_without_ids_parses_to_empty_list() {
        let cli = Cli::try_parse_from(["story-archiver", "documents"]).unwrap();
        assert_eq!(cli.command, Command::Documents { ids: Vec::new() });
    }

    #[test]
    fn document_requires_an_id() {
        assert!(Cli::try_parse_from(["story-archiver", "document"]).is_err());
        let cli =
            Cli::try_parse_from(["story-archiver", "document", "55", "--title", "Notes"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Document {
                id: "55".to_string(),
                title: Some("Notes".to_string())
            }
        );
    }
}
