//! ELM327 Diagnostics CLI
//!
//! Logging setup and text rendering for the `obd-diag` binary.

use anyhow::{Context, Result};
use obd_protocol::ValidPids;
use obd_scheduler::{FreezeFrame, PidSample, TroubleInfo};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Initialize logging on stderr, INFO by default and DEBUG when verbose
pub fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

/// Print `value` as pretty JSON, or `text` as is
pub fn emit<T: Serialize>(json: bool, value: &T, text: &str) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print!("{}", text);
    }
    Ok(())
}

pub fn format_samples(samples: &[PidSample]) -> String {
    let mut out = String::new();
    for sample in samples {
        let _ = writeln!(out, "{:<8} {:<48} {}", sample.key, sample.label, sample.render());
    }
    out
}

pub fn format_valid_pids(pids: &ValidPids) -> String {
    let mut out = String::new();
    for (key, descriptor) in pids {
        let _ = writeln!(out, "{:<8} {}", key, descriptor.label);
    }
    out
}

pub fn format_freeze_frames(frames: &[FreezeFrame]) -> String {
    if frames.is_empty() {
        return "No freeze frames stored\n".to_string();
    }
    let mut out = String::new();
    for frame in frames {
        let _ = writeln!(out, "Freeze frame {}", frame.index);
        for line in format_samples(&frame.samples).lines() {
            let _ = writeln!(out, "  {}", line);
        }
    }
    out
}

fn format_codes(out: &mut String, title: &str, codes: &BTreeMap<String, String>) {
    let _ = writeln!(out, "{}:", title);
    if codes.is_empty() {
        let _ = writeln!(out, "  none");
    }
    for (code, description) in codes {
        let _ = writeln!(out, "  {} {}", code, description);
    }
}

pub fn format_trouble_info(info: &TroubleInfo) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "MIL: {} ({} stored)",
        if info.mil_on { "ON" } else { "OFF" },
        info.stored_code_count
    );
    let _ = writeln!(out, "Monitor status: {}", info.status);
    format_codes(&mut out, "Stored codes", &info.stored);
    format_codes(&mut out, "Pending codes", &info.pending);
    out
}
