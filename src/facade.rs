//! The stateless conversion coordinator (§4.6): acquire a session, navigate,
//! print to PDF, release — on every exit path, including cancellation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::AppError;
use crate::pdf_options::PdfOptions;
use crate::pool::Pool;
use crate::session::Session;

/// Owns a checked-out [`Session`] for the duration of a conversion and
/// guarantees it's returned to `pool`.
///
/// On the happy path [`SessionGuard::release`] hands the session back
/// directly. If the guard is instead dropped while still holding a session
/// — the caller's future was cancelled mid-`.await` — `Drop` spawns a
/// detached task to release it, since `Drop::drop` can't itself be async.
/// Either way the pool always sees a matching release (§4.6 step 5, §5).
struct SessionGuard {
    pool: Arc<Pool>,
    session: Option<Session>,
}

impl SessionGuard {
    fn new(pool: Arc<Pool>, session: Session) -> Self {
        Self {
            pool,
            session: Some(session),
        }
    }

    fn session(&self) -> &Session {
        self.session
            .as_ref()
            .expect("session is only taken by release() or Drop, both of which consume the guard")
    }

    async fn release(mut self) {
        if let Some(session) = self.session.take() {
            self.pool.release(session).await;
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            let pool = Arc::clone(&self.pool);
            tokio::spawn(async move {
                pool.release(session).await;
            });
        }
    }
}

/// Convert `html` (a path to an existing file, or inline HTML content) to
/// PDF bytes using a session acquired from `pool`.
///
/// If `html` does not name an existing file, its contents are materialized
/// to a temporary file (deleted once the conversion completes, success or
/// failure) so the browser can navigate to it via a `file://` URL.
///
/// # Errors
///
/// Returns [`AppError`] if the browser path cannot be resolved, the pool
/// cannot supply a session in time, navigation fails, or PDF generation
/// fails.
pub async fn convert_to_bytes(
    pool: &Arc<Pool>,
    html: &str,
    opts: &PdfOptions,
) -> Result<Vec<u8>, AppError> {
    let (html_path, _temp_guard) = materialize_html(html).await?;
    let url = file_url(&html_path)?;

    let session = pool.acquire().await?;
    let guard = SessionGuard::new(Arc::clone(pool), session);

    let result = async {
        guard.session().navigate(&url).await?;
        guard.session().print_to_pdf(opts).await
    }
    .await;

    guard.release().await;

    result.map_err(AppError::from)
}

/// Convert `html` to PDF and write the bytes to `output_path`, creating any
/// missing parent directories.
///
/// # Errors
///
/// Returns [`AppError`] for the same reasons as [`convert_to_bytes`], plus
/// I/O failures writing the output file.
pub async fn convert(
    pool: &Arc<Pool>,
    html: &str,
    output_path: &Path,
    opts: &PdfOptions,
) -> Result<(), AppError> {
    let bytes = convert_to_bytes(pool, html, opts).await?;

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AppError::with_source(
                    format!("failed to create output directory {}", parent.display()),
                    crate::error::ExitCode::GeneralError,
                    e,
                )
            })?;
        }
    }

    tokio::fs::write(output_path, &bytes).await.map_err(|e| {
        AppError::with_source(
            format!("failed to write PDF to {}", output_path.display()),
            crate::error::ExitCode::GeneralError,
            e,
        )
    })
}

/// If `html` names an existing file, use it as-is. Otherwise treat `html`
/// as inline content and materialize it to a temp file with a stable
/// prefix/suffix, returned alongside a guard that deletes it on drop.
async fn materialize_html(html: &str) -> Result<(PathBuf, Option<tempfile::TempPath>), AppError> {
    let candidate = Path::new(html);
    if tokio::fs::metadata(candidate)
        .await
        .is_ok_and(|m| m.is_file())
    {
        return Ok((candidate.to_path_buf(), None));
    }

    let mut builder = tempfile::Builder::new();
    builder.prefix("html2pdf-").suffix(".html");
    let file = builder.tempfile().map_err(|e| {
        AppError::with_source(
            "failed to create temporary HTML file",
            crate::error::ExitCode::GeneralError,
            e,
        )
    })?;

    tokio::fs::write(file.path(), html).await.map_err(|e| {
        AppError::with_source(
            "failed to write temporary HTML file",
            crate::error::ExitCode::GeneralError,
            e,
        )
    })?;

    let path = file.path().to_path_buf();
    Ok((path, Some(file.into_temp_path())))
}

/// Format an absolute path as a `file://` URL (§4.6 step 2).
fn file_url(path: &Path) -> Result<String, AppError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| {
                AppError::with_source(
                    "failed to resolve current directory",
                    crate::error::ExitCode::GeneralError,
                    e,
                )
            })?
            .join(path)
    };

    url::Url::from_file_path(&absolute)
        .map(|u| u.to_string())
        .map_err(|()| {
            AppError::new(
                format!("could not build a file:// URL from {}", absolute.display()),
                crate::error::ExitCode::GeneralError,
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_url_for_absolute_unix_path() {
        let url = file_url(Path::new("/tmp/example.html")).unwrap();
        assert_eq!(url, "file:///tmp/example.html");
    }

    #[tokio::test]
    async fn materialize_html_uses_existing_file_unchanged() {
        let dir = std::env::temp_dir().join("html2pdf-test-materialize-existing");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("page.html");
        std::fs::write(&path, "<html></html>").unwrap();

        let (resolved, guard) = materialize_html(path.to_str().unwrap()).await.unwrap();
        assert_eq!(resolved, path);
        assert!(guard.is_none());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn materialize_html_writes_inline_content_to_temp_file() {
        let (path, guard) = materialize_html("<html><body>X</body></html>")
            .await
            .unwrap();
        assert!(path.exists());
        assert!(guard.is_some());
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "<html><body>X</body></html>");
    }
}
