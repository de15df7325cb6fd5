use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for the artifact collector.
///
/// Global options select the configuration file and verbosity, the
/// subcommand selects what to do with the registry.
#[derive(Parser, Debug)]
#[clap(name = "artifact-collector", about = "Declarative forensic artifact collector")]
pub struct Args {
    /// Verbose logging
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Path to configuration YAML file
    #[clap(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Subcommands
    #[clap(subcommand)]
    pub command: Commands,
}

/// Available subcommands for the collector.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Collect artifacts from the local host
    Collect(CollectOpts),

    /// List every registered artifact
    List,

    /// Check definition files without registering them
    Validate {
        /// Definition files to check
        #[clap(required = true)]
        files: Vec<PathBuf>,
    },

    /// Persist the definitions in a file to the definition store
    Upload {
        /// Definition file to upload
        file: PathBuf,
    },

    /// Remove an uploaded definition from the definition store
    Delete {
        /// Artifact name
        name: String,
    },

    /// Create a default configuration file
    InitConfig {
        /// Path to output configuration file
        #[clap(default_value = "config.yaml")]
        path: PathBuf,
    },
}

/// Options for the collect subcommand.
#[derive(ClapArgs, Debug)]
pub struct CollectOpts {
    /// Artifacts to collect (comma-separated or repeated)
    #[clap(short, long, value_delimiter = ',', required = true)]
    pub artifacts: Vec<String>,

    /// Client id recorded in the output (default: local hostname)
    #[clap(long)]
    pub client_id: Option<String>,

    /// Output path template; {c}/{p} client, {u} user, {t} time, {a} artifact
    #[clap(long)]
    pub output_template: Option<String>,

    /// Write one output per artifact instead of a merged output
    #[clap(long)]
    pub split_output: bool,

    /// User the collection is attributed to
    #[clap(long)]
    pub user: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_collect_args_parsing() {
        let args = Args::parse_from([
            "artifact-collector",
            "--verbose",
            "collect",
            "-a",
            "WindowsRunKeys,RunningProcesses",
            "-a",
            "UnixHostsFile",
            "--client-id",
            "C.1000",
            "--split-output",
        ]);

        assert!(args.verbose);
        match args.command {
            Commands::Collect(opts) => {
                assert_eq!(opts.artifacts, vec!["WindowsRunKeys", "RunningProcesses", "UnixHostsFile"]);
                assert_eq!(opts.client_id, Some("C.1000".to_string()));
                assert!(opts.split_output);
                assert_eq!(opts.output_template, None);
                assert_eq!(opts.user, None);
            }
            _ => panic!("Expected Collect command"),
        }
    }

    #[test]
    fn test_global_config_after_subcommand() {
        let args = Args::parse_from(["artifact-collector", "list", "-c", "/etc/collector.yaml"]);

        assert_eq!(args.config, Some(PathBuf::from("/etc/collector.yaml")));
        assert!(matches!(args.command, Commands::List));
    }

    #[test]
    fn test_collect_requires_artifacts() {
        assert!(Args::try_parse_from(["artifact-collector", "collect"]).is_err());
    }

    #[test]
    fn test_validate_files() {
        let args = Args::parse_from(["artifact-collector", "validate", "a.yaml", "b.yml"]);
        match args.command {
            Commands::Validate { files } => {
                assert_eq!(files, vec![PathBuf::from("a.yaml"), PathBuf::from("b.yml")]);
            }
            _ => panic!("Expected Validate command"),
        }
    }

    #[test]
    fn test_init_config_default_path() {
        let args = Args::parse_from(["artifact-collector", "init-config"]);
        match args.command {
            Commands::InitConfig { path } => assert_eq!(path, PathBuf::from("config.yaml")),
            _ => panic!("Expected InitConfig command"),
        }
    }

    #[test]
    fn test_upload_and_delete() {
        let upload = Args::parse_from(["artifact-collector", "upload", "custom.yaml"]);
        assert!(matches!(upload.command, Commands::Upload { file } if file == PathBuf::from("custom.yaml")));

        let delete = Args::parse_from(["artifact-collector", "delete", "CustomArtifact"]);
        assert!(matches!(delete.command, Commands::Delete { name } if name == "CustomArtifact"));
    }
}
