//! Compiler invocation and diagnostics normalization.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use kcjpm_util::process::{LineCallback, ProcessExecutor};

use crate::error::CjcError;

/// An opaque locator for the `cjc` binary. Discovery of the compiler on the
/// host is the caller's concern; the driver only ever spawns this path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CjcLocator {
    path: PathBuf,
}

impl CjcLocator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Severity level of a compiler diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Error,
    Warning,
    Info,
}

/// A single structured diagnostic parsed from compiler output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
    /// Source file path, if the diagnostic carried a location.
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

/// Result of one compiler invocation.
#[derive(Debug)]
pub struct CompilationResult {
    /// Whether the compiler exited with status 0.
    pub success: bool,
    /// Exit code, if the process was not killed by a signal.
    pub exit_code: Option<i32>,
    /// Parsed diagnostics from compiler stderr.
    pub diagnostics: Vec<Diagnostic>,
}

impl CompilationResult {
    /// Count the number of error-level diagnostics.
    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.level == DiagnosticLevel::Error)
            .count()
    }

    /// Count the number of warning-level diagnostics.
    pub fn warning_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.level == DiagnosticLevel::Warning)
            .count()
    }
}

/// What kind of output to request from the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputKind {
    #[default]
    Executable,
    Library,
    StaticLibrary,
    DynamicLibrary,
}

impl OutputKind {
    /// The value passed to `--output-type`.
    pub fn as_arg(self) -> &'static str {
        match self {
            OutputKind::Executable => "exe",
            OutputKind::Library => "lib",
            OutputKind::StaticLibrary => "static",
            OutputKind::DynamicLibrary => "dynamic",
        }
    }
}

/// Builder for one `cjc` invocation.
#[derive(Debug, Default)]
pub struct CjcCommand {
    sources: Vec<PathBuf>,
    output_dir: Option<PathBuf>,
    output_type: OutputKind,
    optimization_level: u8,
    debug_info: bool,
    lto: bool,
    target: Option<String>,
    imports: Vec<PathBuf>,
}

impl CjcCommand {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the source files to compile.
    pub fn sources(mut self, paths: &[PathBuf]) -> Self {
        self.sources = paths.to_vec();
        self
    }

    /// Set the directory the compiler writes artifacts into.
    pub fn output_dir(mut self, path: &Path) -> Self {
        self.output_dir = Some(path.to_path_buf());
        self
    }

    /// Set the output kind (`--output-type`).
    pub fn output_type(mut self, kind: OutputKind) -> Self {
        self.output_type = kind;
        self
    }

    /// Set the optimization level (`-O<level>`).
    pub fn optimization_level(mut self, level: u8) -> Self {
        self.optimization_level = level;
        self
    }

    /// Emit debug info (`-g`).
    pub fn debug_info(mut self, enabled: bool) -> Self {
        self.debug_info = enabled;
        self
    }

    /// Enable link-time optimization (`--lto`).
    pub fn lto(mut self, enabled: bool) -> Self {
        self.lto = enabled;
        self
    }

    /// Set the target triple for cross-compilation (`--target`).
    pub fn target(mut self, target: Option<&str>) -> Self {
        self.target = target.map(str::to_owned);
        self
    }

    /// Add compiled artifacts made importable to this unit (`--import`).
    pub fn imports(mut self, paths: &[PathBuf]) -> Self {
        self.imports = paths.to_vec();
        self
    }

    /// Build the argument list, not including the compiler path itself.
    ///
    /// # Errors
    /// Returns an error if no sources or no output directory are set.
    pub fn build_args(&self) -> Result<Vec<String>, CjcError> {
        if self.sources.is_empty() {
            return Err(CjcError::NoSources);
        }
        let Some(output_dir) = &self.output_dir else {
            return Err(CjcError::NoOutput);
        };

        let mut args = Vec::new();

        args.push("--output-type".to_owned());
        args.push(self.output_type.as_arg().to_owned());

        args.push("--output-dir".to_owned());
        args.push(output_dir.display().to_string());

        args.push(format!("-O{}", self.optimization_level));
        if self.debug_info {
            args.push("-g".to_owned());
        }
        if self.lto {
            args.push("--lto".to_owned());
        }

        if let Some(target) = &self.target {
            args.push("--target".to_owned());
            args.push(target.clone());
        }

        for import in &self.imports {
            args.push("--import".to_owned());
            args.push(import.display().to_string());
        }

        // Source files last.
        for source in &self.sources {
            args.push(source.display().to_string());
        }

        Ok(args)
    }

    /// The full argv, locator first. Useful for command reporting.
    ///
    /// # Errors
    /// Returns an error if no sources or no output directory are set.
    pub fn full_argv(&self, locator: &CjcLocator) -> Result<Vec<String>, CjcError> {
        let mut argv = vec![locator.path().display().to_string()];
        argv.extend(self.build_args()?);
        Ok(argv)
    }

    /// Run the compiler to completion, capturing output.
    ///
    /// # Errors
    /// Returns an error if the argv is incomplete or the process cannot be
    /// spawned. A failed compilation is **not** an error; check
    /// `CompilationResult::success`.
    pub fn execute(
        &self,
        locator: &CjcLocator,
        executor: &dyn ProcessExecutor,
    ) -> Result<CompilationResult, CjcError> {
        let argv = self.full_argv(locator)?;
        let output = executor.execute(&argv, None, &[])?;

        Ok(CompilationResult {
            success: output.success,
            exit_code: output.exit_code,
            diagnostics: parse_diagnostics(output.stderr.lines()),
        })
    }

    /// Run the compiler, streaming each output line through the callbacks as
    /// it arrives. Stderr lines are additionally collected and parsed into
    /// diagnostics.
    ///
    /// When `cancel` is set while the compiler runs, the process is killed
    /// and `CjcError::Cancelled` is returned.
    ///
    /// # Errors
    /// Returns an error if the argv is incomplete, the process cannot be
    /// spawned, or the invocation is cancelled.
    pub fn execute_streaming(
        &self,
        locator: &CjcLocator,
        executor: &dyn ProcessExecutor,
        mut on_stdout_line: LineCallback,
        mut on_stderr_line: LineCallback,
        cancel: Option<&AtomicBool>,
    ) -> Result<CompilationResult, CjcError> {
        let argv = self.full_argv(locator)?;

        let stderr_lines: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let collector = Arc::clone(&stderr_lines);

        let mut handle = executor.spawn_streaming(
            &argv,
            None,
            &[],
            Box::new(move |line| on_stdout_line(line)),
            Box::new(move |line| {
                collector
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(line.clone());
                on_stderr_line(line);
            }),
        )?;

        while handle.is_alive() {
            if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                handle.kill();
                handle.wait()?;
                return Err(CjcError::Cancelled);
            }
            std::thread::sleep(std::time::Duration::from_millis(25));
        }
        let exit_code = handle.wait()?;

        let lines = stderr_lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(CompilationResult {
            success: exit_code == Some(0),
            exit_code,
            diagnostics: parse_diagnostics(lines.iter().map(String::as_str)),
        })
    }
}

/// Parse compiler stderr lines into structured diagnostics.
///
/// Handles the location-prefixed form `file.cj:10:5: error: message` and the
/// bare form `error: message`; unrecognized lines are skipped.
pub fn parse_diagnostics<'a>(lines: impl Iterator<Item = &'a str>) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for line in lines {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(diag) = try_parse_located(trimmed).or_else(|| try_parse_bare(trimmed)) {
            diagnostics.push(diag);
        }
    }
    diagnostics
}

struct FileLocation {
    file: String,
    line: u32,
    column: Option<u32>,
}

/// Try to parse `file.cj:10:5: error: message` (column optional).
fn try_parse_located(line: &str) -> Option<Diagnostic> {
    for level_marker in [": error:", ": warning:", ": info:"] {
        if let Some(pos) = line.find(level_marker) {
            let location = line.get(..pos)?;
            let rest = line.get(pos + 2..)?; // past ": "
            if let Some(loc) = parse_location(location) {
                let (level, message) = parse_level_message(rest)?;
                return Some(Diagnostic {
                    level,
                    message,
                    file: Some(loc.file),
                    line: Some(loc.line),
                    column: loc.column,
                });
            }
        }
    }
    None
}

/// Parse `file:line:col` or `file:line`.
fn parse_location(s: &str) -> Option<FileLocation> {
    let mut parts: Vec<&str> = s.rsplitn(3, ':').collect();
    parts.reverse();

    match parts.as_slice() {
        [file, line, column] => {
            // If the last segment is not a number this is `weird:path:123`.
            match (line.parse::<u32>(), column.parse::<u32>()) {
                (Ok(line), Ok(column)) => Some(FileLocation {
                    file: (*file).to_owned(),
                    line,
                    column: Some(column),
                }),
                _ => {
                    // Fall back to treating the first two parts as the file.
                    let file = format!("{file}:{line}");
                    let line = column.parse::<u32>().ok()?;
                    Some(FileLocation {
                        file,
                        line,
                        column: None,
                    })
                }
            }
        }
        [file, line] => {
            let line = line.parse::<u32>().ok()?;
            Some(FileLocation {
                file: (*file).to_owned(),
                line,
                column: None,
            })
        }
        _ => None,
    }
}

/// Try to parse a bare `error: message` line.
fn try_parse_bare(line: &str) -> Option<Diagnostic> {
    let (level, message) = parse_level_message(line)?;
    Some(Diagnostic {
        level,
        message,
        file: None,
        line: None,
        column: None,
    })
}

fn parse_level_message(s: &str) -> Option<(DiagnosticLevel, String)> {
    let prefixes = [
        ("error:", DiagnosticLevel::Error),
        ("warning:", DiagnosticLevel::Warning),
        ("info:", DiagnosticLevel::Info),
    ];
    prefixes.into_iter().find_map(|(prefix, level)| {
        s.strip_prefix(prefix)
            .map(|msg| (level, msg.trim().to_owned()))
    })
}
