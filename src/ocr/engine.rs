use anyhow::{Result, anyhow};
use image::GrayImage;
use std::process::Command;
use tempfile::NamedTempFile;

use super::setup::tesseract_paths;

/// Runs Tesseract on a preprocessed single-line image and returns the
/// trimmed text, or `None` when nothing was recognized.
///
/// `whitelist` restricts the characters Tesseract may output.
pub fn recognize_line(img: &GrayImage, whitelist: Option<&str>) -> Result<Option<String>> {
    let paths = tesseract_paths()?;

    let temp_input = NamedTempFile::with_suffix(".png")?;
    img.save(temp_input.path())?;

    let mut command = Command::new(&paths.executable);
    command
        .arg(temp_input.path())
        .arg("stdout")
        .arg("--tessdata-dir")
        .arg(&paths.tessdata)
        .arg("-l")
        .arg("eng")
        .arg("--psm")
        .arg("7"); // Treat the image as a single text line
    if let Some(chars) = whitelist {
        command
            .arg("-c")
            .arg(format!("tessedit_char_whitelist={}", chars));
    }

    let output = command.output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("Tesseract failed: {}", stderr.trim()));
    }

    Ok(clean_output(&String::from_utf8_lossy(&output.stdout)))
}

/// Trims Tesseract's stdout. Blank output means no text.
fn clean_output(stdout: &str) -> Option<String> {
    let text = stdout.trim();
    (!text.is_empty()).then(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_output() {
        assert_eq!(clean_output("12/100\n\u{c}"), Some("12/100".to_string()));
        assert_eq!(clean_output("  \n"), None);
        assert_eq!(clean_output(""), None);
    }
}
