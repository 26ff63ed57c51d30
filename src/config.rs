//! CLI argument parsing and the optional `compositor.conf` INI file.
//! Section-scanning logic is carried over from anyOS's `config.rs`
//! `read_resolution` — line-oriented, `[section]` headers, `key=value`
//! pairs — generalized from its fixed `[resolution]`/`[autostart]`
//! pair to this crate's single `[display]` section (autostart has no
//! counterpart here: session-shell launching is a single positional CLI
//! argument, not a config-driven list).

use std::path::{Path, PathBuf};

use clap::Parser;

use crate::error::CompositorError;

#[derive(Parser, Debug)]
#[command(name = "wincomp", about = "A damage-driven window compositor core")]
pub struct Cli {
    /// Run nested inside a host compositor instead of owning the display.
    #[arg(short = 'n', long = "nest")]
    pub nest: bool,

    /// Screen geometry as WIDTHxHEIGHT, e.g. 1024x768.
    #[arg(short = 'g', long = "geometry")]
    pub geometry: Option<String>,

    /// Optional path to an INI-style config file (defaults to
    /// `compositor.conf` in the current directory).
    #[arg(short = 'c', long = "config")]
    pub config_path: Option<PathBuf>,

    /// Session shell to spawn once the compositor is ready, forwarded to
    /// `std::process::Command` verbatim.
    pub session_shell: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
}

/// Parse `--geometry WxH`. Both dimensions must be positive.
pub fn parse_geometry_arg(s: &str) -> Result<Geometry, CompositorError> {
    let (w, h) = s
        .split_once('x')
        .or_else(|| s.split_once('X'))
        .ok_or_else(|| CompositorError::BadGeometryArg(s.to_string()))?;
    let width: u32 = w.parse().map_err(|_| CompositorError::BadGeometryArg(s.to_string()))?;
    let height: u32 = h.parse().map_err(|_| CompositorError::BadGeometryArg(s.to_string()))?;
    if width == 0 || height == 0 {
        return Err(CompositorError::InvalidGeometry((width as i64, height as i64)));
    }
    Ok(Geometry { width, height })
}

/// `[display]` section of `compositor.conf`:
/// ```text
/// [display]
/// width=1024
/// height=768
/// ```
pub fn read_display_section(path: &Path) -> Option<Geometry> {
    let text = std::fs::read_to_string(path).ok()?;
    let mut in_display = false;
    let mut width = None;
    let mut height = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with('[') {
            in_display = line == "[display]";
            continue;
        }
        if !in_display {
            continue;
        }
        if let Some(val) = line.strip_prefix("width=") {
            width = val.trim().parse::<u32>().ok();
        } else if let Some(val) = line.strip_prefix("height=") {
            height = val.trim().parse::<u32>().ok();
        }
    }

    match (width, height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => Some(Geometry { width: w, height: h }),
        _ => None,
    }
}

/// Resolve the effective screen geometry. `--geometry` only applies to the
/// nested framebuffer (a real display's size isn't something a command-line
/// flag can override); when nested and unset it defaults to 640x480.
/// Outside nested mode, geometry comes from the config file's `[display]`
/// section, falling back to a hard-coded default.
pub fn resolve_geometry(cli: &Cli) -> Result<Geometry, CompositorError> {
    if cli.nest {
        return match &cli.geometry {
            Some(arg) => parse_geometry_arg(arg),
            None => Ok(Geometry { width: 640, height: 480 }),
        };
    }
    let default_path = PathBuf::from("compositor.conf");
    let path = cli.config_path.as_deref().unwrap_or(&default_path);
    if let Some(geom) = read_display_section(path) {
        return Ok(geom);
    }
    Ok(Geometry { width: 1024, height: 768 })
}
