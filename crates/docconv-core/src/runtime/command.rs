//! Typed engine invocations.
//!
//! Every external call is a program plus an argument vector; nothing is ever
//! passed through a shell, so file names reach the engine verbatim.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};

use strum::{Display, EnumString};

use crate::runtime::types::{SourceKind, TargetFormat};

/// Import filters the engine needs when its default path would flatten the
/// source (a PDF opened by the default path becomes a drawing, not text).
const IMPORT_FILTERS: &[(SourceKind, TargetFormat, &str)] = &[
    (SourceKind::Pdf, TargetFormat::Docx, "writer_pdf_import"),
    (SourceKind::Pdf, TargetFormat::Pptx, "impress_pdf_import"),
];

/// Flags that keep the engine non-interactive.
const HEADLESS_FLAGS: &[&str] = &[
    "--headless",
    "--invisible",
    "--nologo",
    "--norestore",
    "--nolockcheck",
];

/// Program + argv for one external process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    program: OsString,
    args: Vec<OsString>,
}

impl EngineCommand {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    pub(crate) fn to_tokio(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

impl fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            let arg = arg.to_string_lossy();
            if arg.contains(char::is_whitespace) {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Which program handles the pdf → docx direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum PdfToDocxEngine {
    /// The office engine with the writer PDF import filter.
    #[default]
    Soffice,
    /// The `pdf2docx` helper script (`script input.pdf output.docx`).
    Pdf2docx,
}

/// Locations of the external programs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Office engine executable (`soffice`).
    pub soffice: OsString,
    /// Dedicated user profile directory for the engine, if any.
    pub profile_dir: Option<PathBuf>,
    pub pdf_to_docx: PdfToDocxEngine,
    pub python: OsString,
    pub pdf2docx_script: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            soffice: "soffice".into(),
            profile_dir: None,
            pdf_to_docx: PdfToDocxEngine::default(),
            python: "python3".into(),
            pdf2docx_script: PathBuf::from("scripts/convert_pdf_to_docx.py"),
        }
    }
}

impl EngineConfig {
    /// Headless office engine with the shared flags applied.
    fn soffice(&self) -> EngineCommand {
        let cmd = EngineCommand::new(&self.soffice).args(HEADLESS_FLAGS.iter().copied());
        match &self.profile_dir {
            Some(dir) => cmd.arg(format!("-env:UserInstallation={}", file_url(dir))),
            None => cmd,
        }
    }

    /// Cheap invocation that forces the engine through its initialization.
    pub fn probe_command(&self) -> EngineCommand {
        self.soffice().arg("--version")
    }

    /// Build the conversion command for one job.
    ///
    /// `filter_hint` wins over the built-in table; without either the engine
    /// picks its own import path.
    pub fn conversion_command(
        &self,
        source: SourceKind,
        target: TargetFormat,
        filter_hint: Option<&str>,
        input: &Path,
        output_dir: &Path,
    ) -> EngineCommand {
        if source == SourceKind::Pdf
            && target == TargetFormat::Docx
            && self.pdf_to_docx == PdfToDocxEngine::Pdf2docx
            && filter_hint.is_none()
        {
            return EngineCommand::new(&self.python)
                .arg(&self.pdf2docx_script)
                .arg(input)
                .arg(expected_output_path(output_dir, input, target));
        }

        let mut cmd = self.soffice();
        if let Some(filter) = filter_hint.or_else(|| import_filter(source, target)) {
            cmd = cmd.arg(format!("--infilter={filter}"));
        }
        cmd.arg("--convert-to")
            .arg(target.extension())
            .arg("--outdir")
            .arg(output_dir)
            .arg(input)
    }
}

/// Import filter for an ambiguous conversion path, if one is needed.
pub fn import_filter(source: SourceKind, target: TargetFormat) -> Option<&'static str> {
    IMPORT_FILTERS
        .iter()
        .find(|(s, t, _)| *s == source && *t == target)
        .map(|(_, _, filter)| *filter)
}

/// `<output_dir>/<input stem>.<target extension>`: the name the engine
/// normally writes.
pub fn expected_output_path(output_dir: &Path, input: &Path, target: TargetFormat) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_owned());
    output_dir.join(format!("{stem}.{}", target.extension()))
}

fn file_url(dir: &Path) -> String {
    let raw = dir.to_string_lossy().replace('\\', "/");
    if raw.starts_with('/') {
        format!("file://{raw}")
    } else {
        format!("file:///{raw}")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn args_of(cmd: &EngineCommand) -> Vec<String> {
        cmd.get_args()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn pdf_to_docx_uses_writer_import_filter() {
        let engine = EngineConfig::default();
        let cmd = engine.conversion_command(
            SourceKind::Pdf,
            TargetFormat::Docx,
            None,
            Path::new("/work/job/in.pdf"),
            Path::new("/work/job/out"),
        );
        let args = args_of(&cmd);
        assert_eq!(cmd.program(), "soffice");
        assert!(args.contains(&"--headless".to_owned()));
        assert!(args.contains(&"--infilter=writer_pdf_import".to_owned()));
        assert_eq!(
            &args[args.len() - 5..],
            ["--convert-to", "docx", "--outdir", "/work/job/out", "/work/job/in.pdf"]
        );
    }

    #[test]
    fn office_to_pdf_has_no_filter() {
        let cmd = EngineConfig::default().conversion_command(
            SourceKind::Pptx,
            TargetFormat::Pdf,
            None,
            Path::new("deck.pptx"),
            Path::new("out"),
        );
        assert!(!args_of(&cmd).iter().any(|a| a.starts_with("--infilter")));
    }

    #[test]
    fn filter_hint_overrides_table() {
        let cmd = EngineConfig::default().conversion_command(
            SourceKind::Pdf,
            TargetFormat::Pptx,
            Some("draw_pdf_import"),
            Path::new("a.pdf"),
            Path::new("out"),
        );
        let args = args_of(&cmd);
        assert!(args.contains(&"--infilter=draw_pdf_import".to_owned()));
        assert!(!args.contains(&"--infilter=impress_pdf_import".to_owned()));
    }

    #[test]
    fn file_names_stay_single_arguments() {
        let input = Path::new("/tmp/q3 report; rm -rf ~.pptx");
        let cmd = EngineConfig::default().conversion_command(
            SourceKind::Pptx,
            TargetFormat::Pdf,
            None,
            input,
            Path::new("/tmp/out"),
        );
        assert_eq!(cmd.get_args().last().map(|a| a.as_os_str()), Some(input.as_os_str()));
    }

    #[test]
    fn pdf2docx_engine_writes_expected_name() {
        let engine = EngineConfig {
            pdf_to_docx: PdfToDocxEngine::Pdf2docx,
            ..EngineConfig::default()
        };
        let cmd = engine.conversion_command(
            SourceKind::Pdf,
            TargetFormat::Docx,
            None,
            Path::new("/j/scan.pdf"),
            Path::new("/j/out"),
        );
        assert_eq!(cmd.program(), "python3");
        assert_eq!(
            args_of(&cmd),
            ["scripts/convert_pdf_to_docx.py", "/j/scan.pdf", "/j/out/scan.docx"]
        );
    }

    #[test]
    fn profile_dir_becomes_user_installation() {
        let engine = EngineConfig {
            profile_dir: Some(PathBuf::from("/var/lib/docconv/profile")),
            ..EngineConfig::default()
        };
        let args = args_of(&engine.probe_command());
        assert!(args.contains(&"-env:UserInstallation=file:///var/lib/docconv/profile".to_owned()));
        assert_eq!(args.last().map(String::as_str), Some("--version"));
    }

    #[test]
    fn engine_choice_parses_case_insensitively() {
        assert_eq!("PDF2DOCX".parse::<PdfToDocxEngine>().ok(), Some(PdfToDocxEngine::Pdf2docx));
        assert!("word".parse::<PdfToDocxEngine>().is_err());
    }
}
