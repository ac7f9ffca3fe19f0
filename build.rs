use std::env;
use std::fs;
use std::path::{Path, PathBuf};

fn main() {
    // Copy config and map definitions next to the executable
    let Some(target_dir) = target_dir() else {
        return;
    };
    copy_config(&target_dir);
    copy_maps(&target_dir);
}

/// OUT_DIR is something like target/release/build/btd6-autoplayer-xxx/out.
/// Goes up 3 levels to target/release (or target/debug).
fn target_dir() -> Option<PathBuf> {
    let out_dir = env::var("OUT_DIR").ok()?;
    Path::new(&out_dir).ancestors().nth(3).map(Path::to_path_buf)
}

/// Recursively copies a directory and its contents.
fn copy_dir_recursive(src: &Path, dst: &Path) {
    let _ = fs::create_dir_all(dst);

    if let Ok(entries) = fs::read_dir(src) {
        for entry in entries.flatten() {
            let src_path = entry.path();
            let dst_path = dst.join(entry.file_name());

            if src_path.is_dir() {
                copy_dir_recursive(&src_path, &dst_path);
            } else {
                let _ = fs::copy(&src_path, &dst_path);
            }
        }
    }
}

/// Copies the maps folder. Existing map files in the target are overwritten.
fn copy_maps(target_dir: &Path) {
    let maps_src = Path::new("maps");
    if maps_src.exists() {
        copy_dir_recursive(maps_src, &target_dir.join("maps"));
        println!("cargo:rerun-if-changed=maps/");
    }
}

/// Copies config.json to the target directory.
fn copy_config(target_dir: &Path) {
    let config_src = Path::new("config.json");
    if config_src.exists() {
        let _ = fs::copy(config_src, target_dir.join("config.json"));
        println!("cargo:rerun-if-changed=config.json");
    }
}
