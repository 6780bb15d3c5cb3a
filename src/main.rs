use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use clap::{Parser, Subcommand};
use just_vfs::config::{BackendKind, ConfigError, VfsConfig};
use just_vfs::fs::{
    BufferEncoding, CpOptions, FileContent, FileSystem, FsError, FsStat, MkdirOptions,
    ReadFileOptions, RmOptions, WriteFileOptions,
};
use thiserror::Error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "just-vfs")]
#[command(about = "Inspect and edit a virtual filesystem")]
#[command(version)]
struct Cli {
    /// TOML file selecting and seeding the backend
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Serve this host directory (selects the host backend)
    #[arg(long = "root")]
    root: Option<PathBuf>,

    /// Working directory for relative paths
    #[arg(long = "cwd")]
    cwd: Option<String>,

    /// Output results as JSON
    #[arg(long = "json")]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a file
    Cat {
        path: String,
        /// Render the content in this encoding (utf8, base64, hex, latin1, ...)
        #[arg(long)]
        encoding: Option<String>,
    },
    /// Replace a file's content (from the argument or stdin)
    Write {
        path: String,
        content: Option<String>,
        /// Decode the content from this encoding before storing it
        #[arg(long)]
        encoding: Option<String>,
    },
    /// Append to a file (from the argument or stdin)
    Append { path: String, content: Option<String> },
    /// Show file status
    Stat {
        path: String,
        /// Describe a symlink itself rather than its target
        #[arg(long = "no-follow")]
        no_follow: bool,
    },
    /// Create a directory
    Mkdir {
        path: String,
        #[arg(short = 'p', long = "parents")]
        parents: bool,
    },
    /// List a directory
    Ls {
        #[arg(default_value = ".")]
        path: String,
    },
    /// Remove a file or directory
    Rm {
        path: String,
        #[arg(short = 'r', long = "recursive")]
        recursive: bool,
        #[arg(short = 'f', long = "force")]
        force: bool,
    },
    /// Copy a file or directory
    Cp {
        src: String,
        dest: String,
        #[arg(short = 'r', long = "recursive")]
        recursive: bool,
    },
    /// Move or rename
    Mv { src: String, dest: String },
    /// Change permission bits (octal)
    Chmod { mode: String, path: String },
    /// Create a link (a content snapshot unless -s)
    Ln {
        target: String,
        link: String,
        #[arg(short = 's', long = "symbolic")]
        symbolic: bool,
    },
    /// Print a symlink's stored target
    Readlink { path: String },
    /// Print the canonical path
    Realpath { path: String },
    /// Set the modification time to now, creating the file if needed
    Touch { path: String },
    /// List every path under a directory, depth first
    Walk {
        #[arg(default_value = "/")]
        path: String,
    },
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error("invalid mode '{0}'")]
    Mode(String),

    #[error("cannot read stdin: {0}")]
    Stdin(#[source] std::io::Error),

    #[error("cannot write output: {0}")]
    Stdout(#[source] std::io::Error),
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_env("JUST_VFS_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("just-vfs: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = match &cli.config {
        Some(path) => VfsConfig::load(path)?,
        None => VfsConfig::default(),
    };
    if let Some(root) = cli.root {
        config.backend = BackendKind::Host;
        config.root = Some(root);
    }
    if let Some(cwd) = cli.cwd {
        config.cwd = Some(cwd);
    }

    let fs = config.open().await?;
    let cwd = config.cwd();
    let session = Session { fs, cwd, json: cli.json };
    session.dispatch(cli.command).await
}

struct Session {
    fs: Arc<dyn FileSystem>,
    cwd: String,
    json: bool,
}

impl Session {
    fn path(&self, path: &str) -> String {
        self.fs.resolve_path(&self.cwd, path)
    }

    async fn dispatch(&self, command: Command) -> Result<(), CliError> {
        match command {
            Command::Cat { path, encoding } => {
                let path = self.path(&path);
                match parse_encoding(encoding.as_deref())? {
                    Some(encoding) => {
                        let options = ReadFileOptions { encoding: Some(encoding) };
                        let text = self.fs.read_file_with(&path, &options).await?;
                        self.emit(serde_json::json!({ "path": path, "content": text }), &text)?;
                    }
                    None if self.json => {
                        let text = self.fs.read_file(&path).await?;
                        self.print_json(serde_json::json!({ "path": path, "content": text }));
                    }
                    None => {
                        let bytes = self.fs.read_file_buffer(&path).await?;
                        std::io::stdout().write_all(&bytes).map_err(CliError::Stdout)?;
                    }
                }
            }
            Command::Write { path, content, encoding } => {
                let path = self.path(&path);
                let content = match content {
                    Some(text) => FileContent::Text(text),
                    None => FileContent::Binary(read_stdin()?),
                };
                let options = WriteFileOptions {
                    encoding: parse_encoding(encoding.as_deref())?,
                };
                self.fs.write_file_with(&path, &content, &options).await?;
                self.done("write", &path);
            }
            Command::Append { path, content } => {
                let path = self.path(&path);
                let bytes = match content {
                    Some(text) => text.into_bytes(),
                    None => read_stdin()?,
                };
                self.fs.append_file(&path, &bytes).await?;
                self.done("append", &path);
            }
            Command::Stat { path, no_follow } => {
                let path = self.path(&path);
                let stat = if no_follow {
                    self.fs.lstat(&path).await?
                } else {
                    self.fs.stat(&path).await?
                };
                self.emit(stat_json(&path, &stat), &stat_text(&path, &stat))?;
            }
            Command::Mkdir { path, parents } => {
                let path = self.path(&path);
                self.fs.mkdir(&path, &MkdirOptions { recursive: parents }).await?;
                self.done("mkdir", &path);
            }
            Command::Ls { path } => {
                let path = self.path(&path);
                let entries = self.fs.readdir_with_file_types(&path).await?;
                if self.json {
                    let list: Vec<serde_json::Value> = entries
                        .iter()
                        .map(|e| {
                            serde_json::json!({
                                "name": e.name,
                                "isFile": e.is_file,
                                "isDirectory": e.is_directory,
                                "isSymlink": e.is_symlink,
                            })
                        })
                        .collect();
                    self.print_json(serde_json::Value::Array(list));
                } else {
                    for entry in entries {
                        let suffix = if entry.is_directory {
                            "/"
                        } else if entry.is_symlink {
                            "@"
                        } else {
                            ""
                        };
                        println!("{}{}", entry.name, suffix);
                    }
                }
            }
            Command::Rm { path, recursive, force } => {
                let path = self.path(&path);
                self.fs.rm(&path, &RmOptions { recursive, force }).await?;
                self.done("rm", &path);
            }
            Command::Cp { src, dest, recursive } => {
                let (src, dest) = (self.path(&src), self.path(&dest));
                self.fs.cp(&src, &dest, &CpOptions { recursive }).await?;
                self.done("cp", &dest);
            }
            Command::Mv { src, dest } => {
                let (src, dest) = (self.path(&src), self.path(&dest));
                self.fs.mv(&src, &dest).await?;
                self.done("mv", &dest);
            }
            Command::Chmod { mode, path } => {
                let bits = u32::from_str_radix(&mode, 8).map_err(|_| CliError::Mode(mode.clone()))?;
                let path = self.path(&path);
                self.fs.chmod(&path, bits).await?;
                self.done("chmod", &path);
            }
            Command::Ln { target, link, symbolic } => {
                let link = self.path(&link);
                if symbolic {
                    // Stored verbatim; relative targets resolve against the link's directory.
                    self.fs.symlink(&target, &link).await?;
                } else {
                    self.fs.link(&self.path(&target), &link).await?;
                }
                self.done("ln", &link);
            }
            Command::Readlink { path } => {
                let path = self.path(&path);
                let target = self.fs.readlink(&path).await?;
                self.emit(serde_json::json!({ "path": path, "target": target }), &format!("{}\n", target))?;
            }
            Command::Realpath { path } => {
                let path = self.path(&path);
                let real = self.fs.realpath(&path).await?;
                self.emit(serde_json::json!({ "path": path, "realpath": real }), &format!("{}\n", real))?;
            }
            Command::Touch { path } => {
                let path = self.path(&path);
                if !self.fs.exists(&path).await {
                    self.fs.write_file(&path, b"").await?;
                }
                self.fs.utimes(&path, SystemTime::now()).await?;
                self.done("touch", &path);
            }
            Command::Walk { path } => {
                let path = self.path(&path);
                if self.json {
                    let paths: Vec<String> = self.fs.walk(&path).collect();
                    self.print_json(serde_json::json!(paths));
                } else {
                    let mut out = std::io::stdout().lock();
                    for entry in self.fs.walk(&path) {
                        writeln!(out, "{}", entry).map_err(CliError::Stdout)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn emit(&self, json: serde_json::Value, text: &str) -> Result<(), CliError> {
        if self.json {
            self.print_json(json);
            Ok(())
        } else {
            std::io::stdout().write_all(text.as_bytes()).map_err(CliError::Stdout)
        }
    }

    fn print_json(&self, value: serde_json::Value) {
        println!("{}", value);
    }

    fn done(&self, operation: &str, path: &str) {
        tracing::info!(operation, path, "done");
        if self.json {
            self.print_json(serde_json::json!({ "operation": operation, "path": path, "ok": true }));
        }
    }
}

fn parse_encoding(name: Option<&str>) -> Result<Option<BufferEncoding>, FsError> {
    name.map(str::parse).transpose()
}

fn read_stdin() -> Result<Vec<u8>, CliError> {
    let mut buf = Vec::new();
    std::io::stdin().read_to_end(&mut buf).map_err(CliError::Stdin)?;
    Ok(buf)
}

fn kind_name(stat: &FsStat) -> &'static str {
    if stat.is_symlink {
        "symbolic link"
    } else if stat.is_directory {
        "directory"
    } else {
        "regular file"
    }
}

fn mtime_rfc3339(stat: &FsStat) -> String {
    chrono::DateTime::<chrono::Utc>::from(stat.mtime).to_rfc3339()
}

fn stat_json(path: &str, stat: &FsStat) -> serde_json::Value {
    serde_json::json!({
        "path": path,
        "isFile": stat.is_file,
        "isDirectory": stat.is_directory,
        "isSymlink": stat.is_symlink,
        "mode": format!("{:04o}", stat.mode),
        "size": stat.size,
        "mtime": mtime_rfc3339(stat),
    })
}

fn stat_text(path: &str, stat: &FsStat) -> String {
    format!(
        "  File: {}\n  Type: {}\n  Size: {}\n  Mode: {:04o}\nModify: {}\n",
        path,
        kind_name(stat),
        stat.size,
        stat.mode,
        mtime_rfc3339(stat),
    )
}
