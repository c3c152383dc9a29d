use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::auth::session::AuthSession;
use crate::email::filename;
use crate::email::message::{AttachmentDescriptor, Message};
use crate::email::provider::MailProvider;

#[derive(Debug, Default)]
pub struct DownloadReport {
    pub saved: Vec<PathBuf>,
    pub failed: usize,
}

/// Saves attachments of search results into a local folder as `<YYYY-MM-DD>_<filename>`.
pub struct AttachmentDownloader {
    provider: Arc<dyn MailProvider>,
    download_dir: PathBuf,
}

impl AttachmentDownloader {
    pub fn new(provider: Arc<dyn MailProvider>, download_dir: PathBuf) -> Self {
        Self {
            provider,
            download_dir,
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Download every attachment of `emails`, in order. Individual failures are
    /// logged and counted; they never stop the batch.
    pub async fn download_all(
        &self,
        session: &AuthSession,
        emails: &[Message],
    ) -> Result<DownloadReport> {
        tokio::fs::create_dir_all(&self.download_dir)
            .await
            .with_context(|| {
                format!("Failed to create download folder {}", self.download_dir.display())
            })?;

        let mut report = DownloadReport::default();
        for message in emails {
            tracing::info!("Processing email with subject: {:?}", message.subject);
            for attachment in &message.attachments {
                match self.save_attachment(session, message, attachment).await {
                    Ok(path) => report.saved.push(path),
                    Err(e) => {
                        tracing::error!(
                            "Error downloading attachment {:?}: {:#}",
                            attachment.filename,
                            e
                        );
                        report.failed += 1;
                    }
                }
            }
        }

        Ok(report)
    }

    /// Fetch one attachment and write it into the download folder, overwriting any previous copy.
    pub async fn save_attachment(
        &self,
        session: &AuthSession,
        message: &Message,
        attachment: &AttachmentDescriptor,
    ) -> Result<PathBuf> {
        let data = self
            .provider
            .get_attachment(session, &message.id, &attachment.attachment_id)
            .await?;

        let path = self.target_path(message, attachment);
        tokio::fs::write(&path, &data)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        tracing::info!(
            "Saved {:?} as {} ({} bytes)",
            attachment.filename,
            path.display(),
            data.len()
        );
        Ok(path)
    }

    /// Derived filenames are a single path component, so this never leaves the folder
    fn target_path(&self, message: &Message, attachment: &AttachmentDescriptor) -> PathBuf {
        self.download_dir
            .join(filename::derive_filename(&message.date, &attachment.filename))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session::testing::authorized_session;
    use crate::email::mock::MockProvider;
    use crate::search::pipeline::SearchPipeline;

    #[tokio::test]
    async fn test_download_all_writes_dated_files() {
        let provider = Arc::new(
            MockProvider::new()
                .with_message("a", &[("invoice.pdf", "att-a", "PDF-A")])
                .with_message("b", &[("x.csv", "att-b1", "1,2"), ("y.csv", "att-b2", "3,4")]),
        );
        let dir = tempfile::tempdir().unwrap();
        let session = authorized_session(dir.path()).await;

        let outcome = SearchPipeline::new(provider.clone(), 50, 4)
            .search(&session, "")
            .await
            .unwrap();

        let out = dir.path().join("downloads");
        let downloader = AttachmentDownloader::new(provider, out.clone());
        let report = downloader.download_all(&session, &outcome.emails).await.unwrap();

        assert_eq!(report.failed, 0);
        assert_eq!(report.saved.len(), 3);
        assert_eq!(
            std::fs::read(out.join("2024-03-05_invoice.pdf")).unwrap(),
            b"PDF-A"
        );
        assert_eq!(std::fs::read(out.join("2024-03-05_y.csv")).unwrap(), b"3,4");
    }

    #[tokio::test]
    async fn test_redownload_overwrites() {
        let provider = Arc::new(MockProvider::new().with_message("a", &[("r.txt", "1", "new")]));
        let dir = tempfile::tempdir().unwrap();
        let session = authorized_session(dir.path()).await;
        let outcome = SearchPipeline::new(provider.clone(), 50, 1)
            .search(&session, "")
            .await
            .unwrap();

        let out = dir.path().to_path_buf();
        std::fs::write(out.join("2024-03-05_r.txt"), b"old contents").unwrap();

        let downloader = AttachmentDownloader::new(provider, out.clone());
        downloader.download_all(&session, &outcome.emails).await.unwrap();
        downloader.download_all(&session, &outcome.emails).await.unwrap();

        assert_eq!(std::fs::read(out.join("2024-03-05_r.txt")).unwrap(), b"new");
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_traversal_stays_in_folder() {
        let provider = Arc::new(
            MockProvider::new().with_message("a", &[("../../escape.sh", "1", "#!/bin/sh")]),
        );
        let dir = tempfile::tempdir().unwrap();
        let session = authorized_session(dir.path()).await;
        let outcome = SearchPipeline::new(provider.clone(), 50, 1)
            .search(&session, "")
            .await
            .unwrap();

        let out = dir.path().join("inner").join("downloads");
        let downloader = AttachmentDownloader::new(provider, out.clone());
        let report = downloader.download_all(&session, &outcome.emails).await.unwrap();

        assert_eq!(report.saved.len(), 1);
        assert_eq!(report.saved[0].parent().unwrap(), out.as_path());
        assert!(!dir.path().join("escape.sh").exists());
        assert!(!dir.path().join("inner").join("escape.sh").exists());
    }

    #[tokio::test]
    async fn test_missing_attachment_is_counted() {
        let mut mock = MockProvider::new().with_message("a", &[("a.pdf", "1", "A"), ("b.pdf", "2", "B")]);
        mock.attachments.remove(&("a".to_string(), "1".to_string()));
        let provider = Arc::new(mock);
        let dir = tempfile::tempdir().unwrap();
        let session = authorized_session(dir.path()).await;
        let outcome = SearchPipeline::new(provider.clone(), 50, 1)
            .search(&session, "")
            .await
            .unwrap();

        let downloader = AttachmentDownloader::new(provider, dir.path().join("out"));
        let report = downloader.download_all(&session, &outcome.emails).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.saved.len(), 1);
    }
}
