//! Build script for storefront crate.
//!
//! Generates content-based hashes for static assets (CSS) to enable
//! immutable CDN caching.

use std::env;
use std::fs;
use std::path::Path;

use sha2::{Digest, Sha256};

fn main() {
    hash_css();
}

/// Hash main.css and copy to derived directory with hash in filename.
///
/// Sets `CSS_HASH` environment variable for use with `env!("CSS_HASH")`.
fn hash_css() {
    let Ok(manifest_dir) = env::var("CARGO_MANIFEST_DIR") else {
        println!("cargo:warning=CARGO_MANIFEST_DIR is not set");
        println!("cargo:rustc-env=CSS_HASH=");
        return;
    };
    let css_path = Path::new(&manifest_dir).join("static/css/main.css");

    // Tell Cargo to rerun if main.css changes
    println!("cargo:rerun-if-changed={}", css_path.display());

    // Read CSS content
    let content = match fs::read(&css_path) {
        Ok(content) => content,
        Err(e) => {
            // CSS might not exist yet during initial build
            println!("cargo:warning=Could not read main.css: {e}");
            println!("cargo:rustc-env=CSS_HASH=");
            return;
        }
    };

    // Compute hash (first 8 chars of SHA256)
    let mut hasher = Sha256::new();
    hasher.update(&content);
    let hash = format!("{:x}", hasher.finalize());
    let short_hash = hash.get(..8).unwrap_or(&hash);

    // Set environment variable for compile-time access
    println!("cargo:rustc-env=CSS_HASH={short_hash}");

    // Copy CSS to derived directory with hash in filename
    let derived_dir = Path::new(&manifest_dir).join("static/css/derived");
    let derived_path = derived_dir.join(format!("main.{short_hash}.css"));
    if let Err(e) = fs::create_dir_all(&derived_dir).and_then(|()| fs::copy(&css_path, &derived_path)) {
        println!("cargo:warning=Could not write derived CSS: {e}");
    }

    println!("cargo:warning=CSS hash: {short_hash}");
}
