use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "coffer",
    version,
    about = "Incremental encrypted backups to object storage",
    after_help = "\
Any path with a leading colon (:) is excluded from the backup. For example:
  coffer backup ~/pics ~/movies :~/movies/scratch

Examples:
  coffer init --pass foobar --s3-bucket myspecialbucket --s3-region us-west-2
  coffer backup ~/code ~/pics
  coffer restore --dest /tmp/restore ~/code"
)]
pub struct Cli {
    /// Config file to read (if it exists) or write to
    #[arg(long, default_value = "~/.coffer.json")]
    pub config: String,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args)]
pub struct StoreArgs {
    /// Storage medium to use (s3, fs)
    #[arg(long, default_value = "s3")]
    pub storage: String,

    /// Root path to store objects when using filesystem storage
    #[arg(long)]
    pub fs_root: Option<String>,

    /// AWS access key
    #[arg(long)]
    pub s3_key: Option<String>,

    /// AWS secret key
    #[arg(long)]
    pub s3_secret: Option<String>,

    /// AWS region where the S3 bucket is located (e.g. us-west-2)
    #[arg(long)]
    pub s3_region: Option<String>,

    /// S3 bucket name
    #[arg(long)]
    pub s3_bucket: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the store for first use, creating the bucket or folder
    Init {
        /// Encryption password for the new store
        #[arg(long)]
        pass: String,

        /// Force initialization, overwriting existing data in the store
        #[arg(short, long)]
        force: bool,

        #[command(flatten)]
        store: StoreArgs,
    },

    /// Back up files to the store
    Backup {
        /// Encryption password, used when unlocking the store
        #[arg(long)]
        pass: Option<String>,

        #[command(flatten)]
        store: StoreArgs,

        /// Paths to back up; prefix with ':' to exclude
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Restore files from the store
    Restore {
        /// Encryption password, used when unlocking the store
        #[arg(long)]
        pass: Option<String>,

        /// Destination path to restore files to
        #[arg(long)]
        dest: String,

        #[command(flatten)]
        store: StoreArgs,

        /// Paths to restore
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Scan files and write a manifest.json, without any backup or restore
    Scan {
        /// Output file for the manifest
        #[arg(long, default_value = "scan.json")]
        out: String,

        /// Paths to scan; prefix with ':' to exclude
        #[arg(required = true)]
        paths: Vec<String>,
    },
}
