//! Office document to PDF conversion with LibreOffice.

use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::info;

use flextk_common::{Error, Result};

use crate::tools::{arg, require_dir, require_file, stem, MediaTools, Tool};

/// File LibreOffice reports writing, from its `convert ... -> X using filter` line.
pub fn parse_converted_file(stdout: &str) -> Option<PathBuf> {
    let re = Regex::new(r"-> (.*?) using filter").ok()?;
    re.captures(stdout)
        .and_then(|c| c.get(1))
        .map(|m| PathBuf::from(m.as_str().trim()))
}

impl MediaTools {
    /// Convert `input` to PDF inside `output_dir`.
    ///
    /// With `output_name`, the PDF is renamed to `<output_name stem>.pdf`.
    ///
    /// # Postconditions
    /// - Returns the path of the written PDF
    ///
    /// # Errors
    /// - `NotFound` if `input` does not exist
    /// - `InvalidInput` if `output_dir` is not a directory
    /// - `Conversion` if LibreOffice fails or reports no output file
    pub async fn convert_document(
        &self,
        input: &Path,
        output_dir: &Path,
        output_name: Option<&str>,
    ) -> Result<PathBuf> {
        require_file(input, "Input document")?;
        require_dir(output_dir)?;

        let args = vec![
            "--headless".to_string(),
            "--convert-to".to_string(),
            "pdf".to_string(),
            arg(input),
            "--outdir".to_string(),
            arg(output_dir),
        ];
        let output = self
            .runner
            .run(Tool::LibreOffice.program(), &args)
            .await?;

        let produced = parse_converted_file(&output.stdout).ok_or_else(|| {
            Error::Conversion(format!(
                "LibreOffice did not report an output file: {}",
                output.stderr.trim()
            ))
        })?;

        let Some(name) = output_name else {
            info!("Converted {} to {}", input.display(), produced.display());
            return Ok(produced);
        };

        let target = output_dir.join(format!("{}.pdf", stem(Path::new(name))?));
        tokio::fs::rename(&produced, &target).await?;
        info!("Converted {} to {}", input.display(), target.display());
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::fake::FakeRunner;
    use std::sync::Arc;

    #[test]
    fn test_parse_converted_file() {
        let stdout = "convert /tmp/in/report.docx -> /tmp/out/report.pdf using filter : writer_pdf_Export\n";
        assert_eq!(
            parse_converted_file(stdout),
            Some(PathBuf::from("/tmp/out/report.pdf"))
        );
        assert_eq!(parse_converted_file("Error: source file could not be loaded"), None);
    }

    #[tokio::test]
    async fn test_convert_document_renames_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("report.docx");
        std::fs::write(&input, b"doc").unwrap();
        let produced = dir.path().join("report.pdf");
        std::fs::write(&produced, b"%PDF").unwrap();

        let stdout = format!(
            "convert {} -> {} using filter : writer_pdf_Export\n",
            input.display(),
            produced.display()
        );
        let runner = Arc::new(FakeRunner::new().stdout(&stdout));
        let tools = MediaTools::with_runner(runner.clone());

        let pdf = tools
            .convert_document(&input, dir.path(), Some("final.odt"))
            .await
            .unwrap();

        assert_eq!(pdf, dir.path().join("final.pdf"));
        assert!(pdf.exists());
        assert!(!produced.exists());
        let args = &runner.calls()[0].1;
        assert_eq!(args[..3], ["--headless", "--convert-to", "pdf"]);
    }

    #[tokio::test]
    async fn test_silent_failure_is_conversion_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("broken.docx");
        std::fs::write(&input, b"doc").unwrap();

        let tools = MediaTools::with_runner(Arc::new(FakeRunner::new().stdout("")));
        let result = tools.convert_document(&input, dir.path(), None).await;
        assert!(matches!(result, Err(Error::Conversion(_))));
    }
}
