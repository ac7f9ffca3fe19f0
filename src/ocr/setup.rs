use anyhow::{Result, anyhow};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use tracing::info;

const TESSDATA_REPO: &str = "https://github.com/tesseract-ocr/tessdata/raw/main";
const TRAINEDDATA: &str = "eng.traineddata";

#[cfg(windows)]
const EXECUTABLE_NAME: &str = "tesseract.exe";
#[cfg(not(windows))]
const EXECUTABLE_NAME: &str = "tesseract";

#[cfg(windows)]
const COMMON_INSTALL_DIRS: &[&str] = &[
    r"C:\Program Files\Tesseract-OCR",
    r"C:\Program Files (x86)\Tesseract-OCR",
];
#[cfg(not(windows))]
const COMMON_INSTALL_DIRS: &[&str] = &["/usr/bin", "/usr/local/bin", "/opt/homebrew/bin"];

#[cfg(windows)]
const SYSTEM_TESSDATA_DIRS: &[&str] = &[
    r"C:\Program Files\Tesseract-OCR\tessdata",
    r"C:\Program Files (x86)\Tesseract-OCR\tessdata",
];
#[cfg(not(windows))]
const SYSTEM_TESSDATA_DIRS: &[&str] = &[
    "/usr/share/tesseract-ocr/5/tessdata",
    "/usr/share/tesseract-ocr/4.00/tessdata",
    "/usr/share/tessdata",
    "/usr/local/share/tessdata",
];

/// Resolved locations, set once by [`ensure_tesseract`].
static PATHS: OnceLock<TesseractPaths> = OnceLock::new();

#[derive(Clone, Debug)]
pub struct TesseractPaths {
    pub executable: PathBuf,
    pub tessdata: PathBuf,
}

/// Returns the directory for storing downloaded Tesseract files
pub fn get_tesseract_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("btd6-autoplayer")
        .join("tesseract")
}

/// Locates Tesseract and its English model, downloading the model if no
/// copy is found. Call once at startup.
pub fn ensure_tesseract() -> Result<TesseractPaths> {
    if let Some(paths) = PATHS.get() {
        return Ok(paths.clone());
    }

    let executable = find_tesseract_executable()?;
    let tessdata = match find_tessdata_dir() {
        Ok(dir) => dir,
        Err(_) => {
            let local = get_tesseract_dir().join("tessdata");
            fs::create_dir_all(&local)?;
            download_tessdata(&local)?;
            local
        }
    };

    info!(
        "Tesseract: {} (tessdata {})",
        executable.display(),
        tessdata.display()
    );
    let paths = TesseractPaths {
        executable,
        tessdata,
    };
    let _ = PATHS.set(paths.clone());
    Ok(paths)
}

/// Paths resolved at startup, or a fresh lookup if startup never ran.
pub fn tesseract_paths() -> Result<TesseractPaths> {
    match PATHS.get() {
        Some(paths) => Ok(paths.clone()),
        None => ensure_tesseract(),
    }
}

/// Downloads English trained data
fn download_tessdata(tessdata_dir: &Path) -> Result<()> {
    let url = format!("{}/{}", TESSDATA_REPO, TRAINEDDATA);
    let path = tessdata_dir.join(TRAINEDDATA);

    info!("Downloading {}...", TRAINEDDATA);

    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    let response = client
        .get(&url)
        .header("User-Agent", "btd6-autoplayer")
        .send()?;

    if !response.status().is_success() {
        return Err(anyhow!(
            "Failed to download {}: HTTP {}",
            TRAINEDDATA,
            response.status()
        ));
    }

    let bytes = response.bytes()?;
    let mut file = fs::File::create(&path)?;
    file.write_all(&bytes)?;

    info!("Downloaded {} ({} bytes)", TRAINEDDATA, bytes.len());
    Ok(())
}

fn runs_from_path() -> bool {
    Command::new("tesseract")
        .arg("--version")
        .output()
        .is_ok_and(|output| output.status.success())
}

/// Finds the Tesseract executable, checking our local dir first, then PATH,
/// then the usual install locations
pub fn find_tesseract_executable() -> Result<PathBuf> {
    let local_exe = get_tesseract_dir().join(EXECUTABLE_NAME);
    if local_exe.exists() {
        return Ok(local_exe);
    }

    if runs_from_path() {
        return Ok(PathBuf::from("tesseract"));
    }

    COMMON_INSTALL_DIRS
        .iter()
        .map(|dir| Path::new(dir).join(EXECUTABLE_NAME))
        .find(|p| p.exists())
        .ok_or_else(|| {
            anyhow!(
                "Tesseract not found. Install Tesseract-OCR (and add it to PATH) or copy it to {}",
                get_tesseract_dir().display()
            )
        })
}

/// Finds a tessdata directory containing the English model
pub fn find_tessdata_dir() -> Result<PathBuf> {
    let mut candidates = vec![get_tesseract_dir().join("tessdata")];
    candidates.extend(SYSTEM_TESSDATA_DIRS.iter().map(PathBuf::from));
    if let Ok(prefix) = std::env::var("TESSDATA_PREFIX") {
        candidates.push(PathBuf::from(&prefix));
        candidates.push(PathBuf::from(&prefix).join("tessdata"));
    }

    candidates
        .into_iter()
        .find(|dir| dir.join(TRAINEDDATA).exists())
        .ok_or_else(|| anyhow!("tessdata directory with {} not found", TRAINEDDATA))
}
