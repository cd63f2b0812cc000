use clap::{ArgGroup, Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::core::source::TaskId;

/// Frame-by-frame image sequence player
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable debug logging to file (default: frameplay.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE", global = true)]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR", global = true)]
    pub config_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve a directory of images as task frames over HTTP
    Serve(ServeArgs),
    /// Play a frame range from a frame server or a local directory
    Play(PlayArgs),
}

#[derive(ClapArgs, Debug)]
pub struct ServeArgs {
    /// Directory with frame images (sorted by file name)
    #[arg(short = 'd', long = "dir", value_name = "DIR")]
    pub dir: PathBuf,

    /// Listen port
    #[arg(short = 'p', long = "port", default_value_t = 8080)]
    pub port: u16,

    /// Listen address
    #[arg(long = "bind", default_value = "127.0.0.1")]
    pub bind: String,

    /// Only answer for this task id (default: any)
    #[arg(short = 't', long = "task", value_name = "ID")]
    pub task: Option<TaskId>,
}

#[derive(ClapArgs, Debug)]
#[command(group(ArgGroup::new("source").required(true).args(["url", "dir"])))]
pub struct PlayArgs {
    /// Frame server base URL, e.g. http://localhost:8080
    #[arg(short = 'u', long = "url", value_name = "URL")]
    pub url: Option<String>,

    /// Read frames from a local directory instead of a server
    #[arg(short = 'd', long = "dir", value_name = "DIR")]
    pub dir: Option<PathBuf>,

    /// Task id on the frame server
    #[arg(short = 't', long = "task", value_name = "ID", default_value_t = 1)]
    pub task: TaskId,

    /// First frame of the sequence
    #[arg(long = "start", value_name = "N", default_value_t = 0)]
    pub start: i32,

    /// Last frame of the sequence (default with --dir: last file)
    #[arg(long = "stop", value_name = "N")]
    pub stop: Option<i32>,

    /// Frame to open (default: start)
    #[arg(long = "frame", value_name = "N")]
    pub frame: Option<i64>,

    /// Speed selector 1..=6 (1, 5, 12, 25, 50, 100 fps)
    #[arg(long = "fps-index", value_name = "1-6")]
    pub fps_index: Option<i64>,

    /// Forward/backward step, clamped to 2..=100
    #[arg(long = "step", value_name = "N")]
    pub step: Option<i64>,

    /// Annotation mode: fit every frame instead of only the first
    #[arg(long = "annotation")]
    pub annotation: bool,

    /// Start playing once the first frame is shown
    #[arg(short = 'a', long = "autoplay")]
    pub autoplay: bool,

    /// Expose the control API on this port
    #[arg(long = "api-port", value_name = "PORT")]
    pub api_port: Option<u16>,

    /// Exit after this many seconds (default: run until playback ends, or
    /// forever with --api-port)
    #[arg(long = "duration", value_name = "SECS")]
    pub duration: Option<f64>,
}
