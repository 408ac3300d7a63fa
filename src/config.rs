//! Runtime configuration: defaults, the `key = value` configuration file
//! and the command line surface.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

use crate::term::cursor::CursorStyle;

/// Draw latency window: on new input wait up to MIN_LATENCY for idle, but
/// never delay a frame past MAX_LATENCY.
pub const MIN_LATENCY: Duration = Duration::from_millis(8);
pub const MAX_LATENCY: Duration = Duration::from_millis(33);

/// Blink interval for the BLINK attribute; zero disables blinking.
pub const BLINK_TIMEOUT: Duration = Duration::from_millis(800);

/// Terminal identification reply for DA/DECID.
pub const VT_IDENT_DEFAULT: &str = "\x1b[?6c";

const MAX_DIMENSION: usize = 1000;

#[derive(Debug, Clone)]
pub struct Config {
    pub rows: usize,
    pub cols: usize,
    pub history_len: usize,
    pub keep_scroll_position: bool,
    pub allow_altscreen: bool,
    pub allow_window_ops: bool,
    pub cursor_shape: CursorStyle,
    pub word_delimiters: String,
    pub vt_ident: String,
    /// Command to run instead of the user's shell.
    pub command: Vec<String>,
    /// Path for media-copy output, "-" meaning stdout.
    pub io_file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rows: 24,
            cols: 80,
            history_len: 10_000,
            keep_scroll_position: false,
            allow_altscreen: true,
            allow_window_ops: false,
            cursor_shape: CursorStyle::default(),
            word_delimiters: " ".into(),
            vt_ident: std::env::var("VT_IDENT").unwrap_or_else(|_| VT_IDENT_DEFAULT.into()),
            command: Vec::new(),
            io_file: None,
        }
    }
}

impl Config {
    /// Build the effective configuration: defaults, overridden by the
    /// config file, overridden by command line options.
    pub fn load(cli: &Cli) -> Self {
        let mut config = Config::default();

        let file = match &cli.config {
            Some(path) => ConfigFile::parse(path),
            None => default_config_path()
                .map(|p| ConfigFile::parse(&p))
                .unwrap_or_default(),
        };
        config.apply_file(&file);
        config.apply_cli(cli);
        config
    }

    fn apply_file(&mut self, file: &ConfigFile) {
        if let Some(keep) = file.as_bool("keep_scroll_position") {
            self.keep_scroll_position = keep;
        }
        if let Some(len) = file.as_unsigned("history_len") {
            self.history_len = len;
        }
        if let Some(rows) = file.as_unsigned("rows") {
            self.set_rows(rows);
        }
        if let Some(cols) = file.as_unsigned("cols") {
            self.set_cols(cols);
        }
        if let Some(shape) = file.as_string("cursor_shape") {
            match CursorStyle::from_name(shape) {
                Some(style) => self.cursor_shape = style,
                None => tracing::warn!("unknown cursor_shape {shape:?}, keeping default"),
            }
        }
        if let Some(delims) = file.as_string("word_delimiters") {
            self.word_delimiters = delims.to_string();
        }
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(len) = cli.history_length {
            self.history_len = len;
        }
        if let Some(allow) = cli.allow_alt_screen {
            self.allow_altscreen = allow;
        }
        if cli.keep_scroll_position {
            self.keep_scroll_position = true;
        }
        if cli.allow_window_ops {
            self.allow_window_ops = true;
        }
        if let Some(rows) = cli.rows {
            self.set_rows(rows);
        }
        if let Some(cols) = cli.cols {
            self.set_cols(cols);
        }
        if let Some(shape) = &cli.cursor_shape {
            match CursorStyle::from_name(shape) {
                Some(style) => self.cursor_shape = style,
                None => tracing::warn!("unknown cursor shape {shape:?}, keeping default"),
            }
        }
        if let Some(io_file) = &cli.io_file {
            self.io_file = Some(io_file.clone());
        }
        self.command = cli.command.clone();
    }

    fn set_rows(&mut self, rows: usize) {
        if (1..=MAX_DIMENSION).contains(&rows) {
            self.rows = rows;
        } else {
            tracing::warn!("rows value {rows} out of range, using {}", self.rows);
        }
    }

    fn set_cols(&mut self, cols: usize) {
        if (1..=MAX_DIMENSION).contains(&cols) {
            self.cols = cols;
        } else {
            tracing::warn!("cols value {cols} out of range, using {}", self.cols);
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))?;
    Some(base.join("nst").join("nst.conf"))
}

/// Command line options relevant to the terminal core.
#[derive(Debug, Parser, Default)]
#[command(name = "nst", about = "VT-compatible terminal emulator core")]
pub struct Cli {
    /// Number of scrollback lines to keep.
    #[arg(long)]
    pub history_length: Option<usize>,

    /// Allow applications to switch to the alternate screen.
    #[arg(long)]
    pub allow_alt_screen: Option<bool>,

    /// Keep the scrollback position when new output arrives.
    #[arg(long)]
    pub keep_scroll_position: bool,

    /// Allow potentially insecure window operations like OSC 52.
    #[arg(long)]
    pub allow_window_ops: bool,

    /// Initial number of rows.
    #[arg(long)]
    pub rows: Option<usize>,

    /// Initial number of columns.
    #[arg(long)]
    pub cols: Option<usize>,

    /// Cursor shape: (blinking-)block, underline, bar or snowman.
    #[arg(long)]
    pub cursor_shape: Option<String>,

    /// Configuration file path.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// File for media-copy output, "-" for stdout.
    #[arg(short = 'o', long)]
    pub io_file: Option<String>,

    /// Command to execute instead of the shell.
    #[arg(trailing_var_arg = true)]
    pub command: Vec<String>,
}

/// `key = value` pairs parsed from one or more configuration files; later
/// files override earlier entries.
#[derive(Debug, Default)]
pub struct ConfigFile {
    items: HashMap<String, String>,
}

impl ConfigFile {
    pub fn parse(path: &Path) -> Self {
        let mut file = ConfigFile::default();
        file.parse_into(path);
        file
    }

    /// Parse `path` and merge its entries; a missing file is not an error.
    pub fn parse_into(&mut self, path: &Path) {
        let Ok(content) = std::fs::read_to_string(path) else {
            return;
        };

        for (linenr, line) in content.lines().enumerate() {
            self.parse_line(path, linenr + 1, line);
        }
    }

    fn parse_line(&mut self, path: &Path, linenr: usize, line: &str) {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return;
        }

        let Some((key, value)) = line.split_once('=') else {
            tracing::error!(
                "config parse error in {}:{linenr}: missing '=' separator",
                path.display()
            );
            return;
        };

        self.items
            .insert(key.trim().to_string(), value.trim().to_string());
    }

    pub fn as_string(&self, key: &str) -> Option<&str> {
        self.items.get(key).map(String::as_str)
    }

    pub fn as_bool(&self, key: &str) -> Option<bool> {
        let value = self.as_string(key)?;
        match value {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => {
                tracing::warn!("invalid boolean for {key}: {value:?}");
                None
            }
        }
    }

    pub fn as_unsigned(&self, key: &str) -> Option<usize> {
        let value = self.as_string(key)?;
        match value.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!("invalid number for {key}: {value:?}");
                None
            }
        }
    }
}
