use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "snapvault", version, about = "Run one snapshot-safe backup job")]
pub struct Cli {
    /// Job file describing what to back up
    pub job_file: PathBuf,

    /// Settings file [default: /etc/snapvault/settings.yaml]
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Log commands instead of running them
    #[arg(long)]
    pub dry_run: bool,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(long, short = 'd')]
    pub debug: bool,

    /// Print the resolved job and exit
    #[arg(long)]
    pub print_job: bool,

    /// Do not take the per-job pid lock
    #[arg(long)]
    pub no_lock: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags_and_job_file() {
        let cli = Cli::try_parse_from([
            "snapvault",
            "--settings",
            "/tmp/settings.yaml",
            "--dry-run",
            "-d",
            "/etc/snapvault/jobs/db1.yaml",
        ])
        .unwrap();
        assert_eq!(cli.job_file, PathBuf::from("/etc/snapvault/jobs/db1.yaml"));
        assert_eq!(cli.settings, Some(PathBuf::from("/tmp/settings.yaml")));
        assert!(cli.dry_run && cli.debug);
        assert!(!cli.print_job && !cli.no_lock);
    }

    #[test]
    fn job_file_is_required() {
        assert!(Cli::try_parse_from(["snapvault", "--dry-run"]).is_err());
    }
}
