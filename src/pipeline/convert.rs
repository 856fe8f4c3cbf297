use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{IngestError, Result};
use crate::pipeline::classify::ContentKind;
use crate::retry::RetryPolicy;

/// Opaque conversion backend: bytes in, PDF bytes out or a typed failure.
///
/// Implementations are black boxes (external processes/services); the
/// pipeline depends only on this contract and a bounded invocation timeout.
#[async_trait]
pub trait Converter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn to_pdf(&self, input: &[u8]) -> Result<Vec<u8>>;
}

/// Outcome of routing one classified payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Conversion {
    /// Canonical PDF bytes, ready for archiving.
    Pdf(Vec<u8>),
    /// No conversion path for this type; carries the type string.
    Skipped(String),
}

/// Dispatches by classified content kind.
///
/// Routing on the sniffed kind rather than the declared type keeps a
/// mislabeled document from reaching the wrong backend.
pub struct ConverterRouter {
    office: Arc<dyn Converter>,
    browser: Arc<dyn Converter>,
    retry: RetryPolicy,
}

impl ConverterRouter {
    pub fn new(office: Arc<dyn Converter>, browser: Arc<dyn Converter>, retry: RetryPolicy) -> Self {
        ConverterRouter {
            office,
            browser,
            retry,
        }
    }

    pub async fn to_canonical(&self, bytes: Vec<u8>, kind: &ContentKind) -> Result<Conversion> {
        match kind {
            ContentKind::Pdf => Ok(Conversion::Pdf(bytes)),
            ContentKind::Office => self
                .run_backend(self.office.as_ref(), &bytes)
                .await
                .map(Conversion::Pdf),
            ContentKind::Html => self
                .run_backend(self.browser.as_ref(), &bytes)
                .await
                .map(Conversion::Pdf),
            ContentKind::Unsupported(declared) => {
                debug!(content_type = %declared, "no conversion path, skipping");
                Ok(Conversion::Skipped(declared.clone()))
            }
        }
    }

    /// Conversion backends are known to fail transiently under load, so
    /// every backend failure is retried up to the policy's small ceiling.
    async fn run_backend(&self, backend: &dyn Converter, bytes: &[u8]) -> Result<Vec<u8>> {
        self.retry
            .run(
                backend.name(),
                |e| matches!(e, IngestError::ConversionFailed { .. }),
                || backend.to_pdf(bytes),
            )
            .await
    }
}

/// Office-document backend invoked as a headless `soffice` process.
pub struct SofficeConverter {
    binary: String,
    timeout: Duration,
}

impl SofficeConverter {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        SofficeConverter {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Converter for SofficeConverter {
    fn name(&self) -> &'static str {
        "soffice"
    }

    async fn to_pdf(&self, input: &[u8]) -> Result<Vec<u8>> {
        // Private scratch directory per invocation keeps concurrent workers
        // from clobbering each other's files.
        let workdir = tempfile::tempdir()?;
        let input_path = workdir.path().join("input.docx");
        tokio::fs::write(&input_path, input).await?;

        let mut command = Command::new(&self.binary);
        command
            .arg("--headless")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(workdir.path())
            .arg(&input_path);
        run_with_timeout(self.name(), command, self.timeout).await?;

        read_produced_pdf(self.name(), &workdir.path().join("input.pdf")).await
    }
}

/// HTML backend: a headless browser renders the page to PDF.
pub struct BrowserRenderer {
    binary: String,
    timeout: Duration,
}

impl BrowserRenderer {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        BrowserRenderer {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Converter for BrowserRenderer {
    fn name(&self) -> &'static str {
        "browser-renderer"
    }

    async fn to_pdf(&self, input: &[u8]) -> Result<Vec<u8>> {
        let workdir = tempfile::tempdir()?;
        let input_path = workdir.path().join("input.html");
        let output_path = workdir.path().join("output.pdf");
        tokio::fs::write(&input_path, input).await?;

        let mut command = Command::new(&self.binary);
        command
            .arg("--headless")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg(format!("--print-to-pdf={}", output_path.display()))
            .arg(&input_path);
        run_with_timeout(self.name(), command, self.timeout).await?;

        read_produced_pdf(self.name(), &output_path).await
    }
}

async fn run_with_timeout(
    backend: &'static str,
    mut command: Command,
    timeout: Duration,
) -> Result<()> {
    command.kill_on_drop(true);
    debug!(%backend, "invoking conversion backend");
    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| IngestError::ConversionFailed {
            backend,
            reason: format!("timed out after {}s", timeout.as_secs()),
        })?
        .map_err(|e| IngestError::ConversionFailed {
            backend,
            reason: format!("failed to spawn: {e}"),
        })?;

    if !output.status.success() {
        return Err(IngestError::ConversionFailed {
            backend,
            reason: format!(
                "exit {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(())
}

async fn read_produced_pdf(backend: &'static str, path: &Path) -> Result<Vec<u8>> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| IngestError::ConversionFailed {
            backend,
            reason: format!("no output produced: {e}"),
        })?;
    info!(%backend, bytes = bytes.len(), "conversion backend produced canonical pdf");
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scripted backend: fails `failures` times, then succeeds.
    struct FlakyConverter {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyConverter {
        fn new(failures: u32) -> Self {
            FlakyConverter {
                failures,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Converter for FlakyConverter {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn to_pdf(&self, _input: &[u8]) -> Result<Vec<u8>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                Err(IngestError::ConversionFailed {
                    backend: "flaky",
                    reason: format!("transient failure {n}"),
                })
            } else {
                Ok(b"%PDF-1.7 converted".to_vec())
            }
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2))
    }

    fn router_with(office: Arc<FlakyConverter>, browser: Arc<FlakyConverter>) -> ConverterRouter {
        ConverterRouter::new(office, browser, fast_retry())
    }

    #[tokio::test]
    async fn pdf_passes_through_unchanged() {
        let office = Arc::new(FlakyConverter::new(0));
        let browser = Arc::new(FlakyConverter::new(0));
        let router = router_with(office.clone(), browser.clone());

        let bytes = b"%PDF-1.4 original".to_vec();
        let out = router
            .to_canonical(bytes.clone(), &ContentKind::Pdf)
            .await
            .unwrap();
        assert_eq!(out, Conversion::Pdf(bytes));
        assert_eq!(office.calls.load(Ordering::SeqCst), 0);
        assert_eq!(browser.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unsupported_skips_without_backend_invocation() {
        let office = Arc::new(FlakyConverter::new(0));
        let browser = Arc::new(FlakyConverter::new(0));
        let router = router_with(office.clone(), browser.clone());

        let out = router
            .to_canonical(
                b"GIF89a".to_vec(),
                &ContentKind::Unsupported("image/gif".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(out, Conversion::Skipped("image/gif".to_string()));
        assert_eq!(office.calls.load(Ordering::SeqCst), 0);
        assert_eq!(browser.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transient_backend_failure_is_retried() {
        let office = Arc::new(FlakyConverter::new(2));
        let browser = Arc::new(FlakyConverter::new(0));
        let router = router_with(office.clone(), browser);

        let out = router
            .to_canonical(b"PK\x03\x04doc".to_vec(), &ContentKind::Office)
            .await
            .unwrap();
        assert!(matches!(out, Conversion::Pdf(_)));
        assert_eq!(office.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_backend_escalates() {
        let office = Arc::new(FlakyConverter::new(10));
        let browser = Arc::new(FlakyConverter::new(0));
        let router = router_with(office.clone(), browser);

        let err = router
            .to_canonical(b"PK\x03\x04doc".to_vec(), &ContentKind::Office)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::ConversionFailed { .. }));
        assert_eq!(office.calls.load(Ordering::SeqCst), 3);
    }
}
