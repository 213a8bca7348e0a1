use crate::errors::{AppError, AppResult};
use crate::models::{LogBulkOutcome, LogFileInfo, LogSearch, LogSearchHit, LogTail, PackedLogs};
use chrono::{DateTime, Local};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const DEFAULT_TAIL_LINES: usize = 100;
pub const DEFAULT_SEARCH_RESULTS: usize = 100;

const LOG_EXTENSION: &str = ".log";

/// Read and housekeeping operations over the rotating log directory.
#[derive(Debug, Clone)]
pub struct LogInspector {
    log_dir: PathBuf,
}

impl LogInspector {
    pub fn new(log_dir: impl Into<PathBuf>) -> AppResult<Self> {
        let log_dir = log_dir.into();
        fs::create_dir_all(&log_dir)?;
        Ok(Self { log_dir })
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn list(&self) -> AppResult<Vec<LogFileInfo>> {
        let mut entries = Vec::new();
        for name in self.log_file_names()? {
            let path = self.log_dir.join(&name);
            let metadata = fs::metadata(&path)?;
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            entries.push((
                modified,
                LogFileInfo {
                    path: path.to_string_lossy().to_string(),
                    size: format_file_size(metadata.len()),
                    modified: DateTime::<Local>::from(modified).format("%Y-%m-%d %H:%M:%S").to_string(),
                    name,
                },
            ));
        }

        entries.sort_by(|left, right| right.0.cmp(&left.0).then_with(|| left.1.name.cmp(&right.1.name)));
        Ok(entries.into_iter().map(|(_, info)| info).collect())
    }

    pub fn tail(&self, file_name: &str, lines: usize) -> AppResult<LogTail> {
        let path = self.existing_file(file_name)?;
        let raw = fs::read(&path)?;
        let text = String::from_utf8_lossy(&raw);

        let all_lines: Vec<&str> = text.split_inclusive('\n').collect();
        let start = all_lines.len().saturating_sub(lines);
        let shown = &all_lines[start..];

        Ok(LogTail {
            content: shown.concat(),
            total_lines: all_lines.len(),
            shown_lines: shown.len(),
            file_size: format_file_size(raw.len() as u64),
        })
    }

    /// Case-insensitive substring search. Stops as soon as `max_results` hits
    /// have been collected.
    pub fn search(&self, keyword: &str, file_name: Option<&str>, max_results: usize) -> AppResult<LogSearch> {
        if keyword.is_empty() {
            return Err(AppError::Validation("keyword must not be empty".to_string()));
        }
        let needle = keyword.to_lowercase();

        let files = match file_name {
            Some(name) => {
                validate_file_name(name)?;
                if self.log_dir.join(name).is_file() {
                    vec![name.to_string()]
                } else {
                    Vec::new()
                }
            }
            None => self.log_file_names()?,
        };

        let mut results = Vec::new();
        'files: for name in files {
            if results.len() >= max_results {
                break;
            }
            let file = match File::open(self.log_dir.join(&name)) {
                Ok(file) => file,
                Err(error) => {
                    tracing::warn!(file = %name, error = %error, "skipping unreadable log file");
                    continue;
                }
            };

            let mut reader = BufReader::new(file);
            let mut buffer = Vec::new();
            let mut line_num = 0usize;
            loop {
                buffer.clear();
                match reader.read_until(b'\n', &mut buffer) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(error) => {
                        tracing::warn!(file = %name, error = %error, "log read interrupted");
                        break;
                    }
                }
                line_num += 1;
                let line = String::from_utf8_lossy(&buffer);
                if line.to_lowercase().contains(&needle) {
                    results.push(LogSearchHit {
                        file: name.clone(),
                        line_num,
                        content: line.trim().to_string(),
                    });
                    if results.len() >= max_results {
                        break 'files;
                    }
                }
            }
        }

        let total = results.len();
        Ok(LogSearch { results, total })
    }

    /// Truncates one file, or every log file when `file_name` is `None`.
    pub fn clear(&self, file_name: Option<&str>) -> AppResult<LogBulkOutcome> {
        self.apply(file_name, |path| {
            OpenOptions::new().write(true).truncate(true).open(path).map(|_| ())
        })
    }

    /// Removes one file, or every log file when `file_name` is `None`.
    pub fn delete(&self, file_name: Option<&str>) -> AppResult<LogBulkOutcome> {
        self.apply(file_name, |path| fs::remove_file(path))
    }

    fn apply(
        &self,
        file_name: Option<&str>,
        action: impl Fn(&Path) -> std::io::Result<()>,
    ) -> AppResult<LogBulkOutcome> {
        if let Some(name) = file_name {
            let path = self.existing_file(name)?;
            action(&path)?;
            return Ok(LogBulkOutcome {
                affected: vec![name.to_string()],
                failed: Vec::new(),
            });
        }

        let mut outcome = LogBulkOutcome::default();
        for name in self.log_file_names()? {
            match action(&self.log_dir.join(&name)) {
                Ok(()) => outcome.affected.push(name),
                Err(error) => {
                    tracing::warn!(file = %name, error = %error, "log file operation failed");
                    outcome.failed.push(name);
                }
            }
        }
        Ok(outcome)
    }

    /// Bundles every log file into `logs_{timestamp}_{suffix}.zip` under `output_dir`.
    pub fn pack(&self, output_dir: &Path) -> AppResult<PackedLogs> {
        let names = self.log_file_names()?;
        self.pack_files(output_dir, &names)
    }

    fn pack_files(&self, output_dir: &Path, names: &[String]) -> AppResult<PackedLogs> {
        fs::create_dir_all(output_dir)?;
        let suffix = Uuid::new_v4().simple().to_string();
        let file_name = format!("logs_{}_{}.zip", Local::now().format("%Y%m%d_%H%M%S"), &suffix[..8]);
        let zip_path = output_dir.join(&file_name);

        if let Err(error) = self.write_archive(&zip_path, names) {
            let _ = fs::remove_file(&zip_path);
            tracing::error!(archive = %zip_path.display(), error = %error, "log packing failed");
            return Err(error);
        }

        let size = fs::metadata(&zip_path)?.len();
        tracing::info!(archive = %zip_path.display(), bytes = size, "logs packed");
        Ok(PackedLogs {
            file_name,
            file_path: zip_path.to_string_lossy().to_string(),
            file_size: format_file_size(size),
        })
    }

    fn write_archive(&self, zip_path: &Path, names: &[String]) -> AppResult<()> {
        let mut writer = ZipWriter::new(File::create(zip_path)?);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for name in names {
            let mut source = File::open(self.log_dir.join(name))?;
            writer.start_file(name.as_str(), options)?;
            std::io::copy(&mut source, &mut writer)?;
        }
        writer.finish()?;
        Ok(())
    }

    fn existing_file(&self, file_name: &str) -> AppResult<PathBuf> {
        validate_file_name(file_name)?;
        let path = self.log_dir.join(file_name);
        if !path.is_file() {
            return Err(AppError::NotFound(format!("log file {} does not exist", file_name)));
        }
        Ok(path)
    }

    fn log_file_names(&self) -> AppResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.log_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(LOG_EXTENSION) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

// Caller-supplied names must stay inside the log directory.
fn validate_file_name(name: &str) -> AppResult<()> {
    if name.is_empty() || name.contains("..") || name.contains('/') || name.contains('\\') || name.contains('\0') {
        return Err(AppError::Validation(format!("invalid log file name: {:?}", name)));
    }
    Ok(())
}

pub fn format_file_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let size = bytes as f64;
    if size < KB {
        format!("{} B", bytes)
    } else if size < MB {
        format!("{:.2} KB", size / KB)
    } else if size < GB {
        format!("{:.2} MB", size / MB)
    } else {
        format!("{:.2} GB", size / GB)
    }
}
