// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Exposes `TANDEM_VERSION` to the binary.
//!
//! Release tags look like `v0.4.0`. Builds from a tagged checkout report the
//! tag; builds past a tag get the distance and short hash appended
//! (`0.4.0+3.gabc1234`), plus `.dirty` for uncommitted changes. Without git
//! the package version is used as is.

#![allow(clippy::print_stdout, reason = "cargo reads build directives from stdout")]

use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs");
    println!("cargo:rerun-if-changed=.git/index");

    let version = describe_head()
        .map_or_else(|| env!("CARGO_PKG_VERSION").to_string(), |d| d.render());
    println!("cargo:rustc-env=TANDEM_VERSION={version}");
}

/// Parsed output of `git describe --long`.
struct Describe {
    tag: String,
    distance: u32,
    hash: String,
    dirty: bool,
}

impl Describe {
    fn render(&self) -> String {
        let tag = self.tag.strip_prefix('v').unwrap_or(&self.tag);
        let mut version = if self.distance == 0 {
            tag.to_string()
        } else {
            format!("{tag}+{}.{}", self.distance, self.hash)
        };
        if self.dirty {
            version.push_str(if self.distance == 0 { "+dirty" } else { ".dirty" });
        }
        version
    }
}

fn describe_head() -> Option<Describe> {
    let output = Command::new("git")
        .args(["describe", "--tags", "--long", "--dirty", "--match", "v*"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }

    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    let (text, dirty) = text
        .strip_suffix("-dirty")
        .map_or((text, false), |t| (t, true));

    // <tag>-<distance>-g<hash>; tags may contain dashes themselves
    let mut parts = text.rsplitn(3, '-');
    let hash = parts.next()?.to_string();
    let distance = parts.next()?.parse().ok()?;
    let tag = parts.next()?.to_string();

    Some(Describe {
        tag,
        distance,
        hash,
        dirty,
    })
}
