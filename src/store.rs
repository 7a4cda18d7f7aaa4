//! Content Store: durable, project-partitioned persistence for reviews.
//!
//! One file per review, named `<id>.json`, under either a project-scoped
//! directory (`<dataRoot>/projects/<encodedPath>/`) or the legacy global
//! directory (`<dataRoot>/`) when no project path was supplied.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::errors::AppError;
use crate::model::{Review, ReviewStatus};

/// One-way filesystem-safe encoding of a project path: strip the leading
/// `/`, then replace every `/` and `:` with `_`. Never decoded back.
pub fn encode_project_path(project_path: &str) -> String {
    project_path
        .strip_prefix('/')
        .unwrap_or(project_path)
        .chars()
        .map(|c| if c == '/' || c == ':' { '_' } else { c })
        .collect()
}

#[derive(Clone)]
pub struct ContentStore {
    data_root: PathBuf,
}

impl ContentStore {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
        }
    }

    fn global_dir(&self) -> PathBuf {
        self.data_root.clone()
    }

    fn project_dir(&self, project_path: &str) -> PathBuf {
        self.data_root
            .join("projects")
            .join(encode_project_path(project_path))
    }

    fn record_path(&self, review: &Review) -> PathBuf {
        let dir = match &review.project_path {
            Some(p) => self.project_dir(p),
            None => self.global_dir(),
        };
        dir.join(format!("{}.json", review.id))
    }

    /// Atomic whole-file write: serialize, write to a sibling temp file,
    /// then rename over the final path so a crash mid-write never leaves a
    /// truncated record.
    pub async fn save(&self, review: &Review) -> Result<(), AppError> {
        let path = self.record_path(review);
        let dir = path
            .parent()
            .expect("record path always has a parent")
            .to_path_buf();
        fs::create_dir_all(&dir).await?;

        let body = serde_json::to_vec_pretty(review)?;
        let tmp_path = dir.join(format!(".{}.json.tmp", review.id));
        {
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(&body).await?;
            file.sync_all().await?;
        }
        fs::rename(&tmp_path, &path).await?;

        tracing::debug!(review_id = %review.id, path = %path.display(), "saved review");
        Ok(())
    }

    /// Search order: explicit project dir → global dir → scan of all
    /// project dirs. First hit wins.
    pub async fn load(
        &self,
        id: Uuid,
        project_path: Option<&str>,
    ) -> Result<Option<Review>, AppError> {
        if let Some(project_path) = project_path {
            let path = self.project_dir(project_path).join(format!("{id}.json"));
            if let Some(review) = Self::read_record(&path).await? {
                return Ok(Some(review));
            }
        }

        let global_path = self.global_dir().join(format!("{id}.json"));
        if let Some(review) = Self::read_record(&global_path).await? {
            return Ok(Some(review));
        }

        let projects_root = self.data_root.join("projects");
        if let Ok(mut entries) = fs::read_dir(&projects_root).await {
            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_dir() {
                    continue;
                }
                let candidate = entry.path().join(format!("{id}.json"));
                if let Some(review) = Self::read_record(&candidate).await? {
                    return Ok(Some(review));
                }
            }
        }

        Ok(None)
    }

    async fn read_record(path: &Path) -> Result<Option<Review>, AppError> {
        match fs::read(path).await {
            Ok(bytes) => {
                tracing::debug!(path = %path.display(), "loaded review");
                Ok(Some(serde_json::from_slice(&bytes)?))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Non-terminal reviews in one project directory, newest-modified first.
    pub async fn list_pending(&self, project_path: &str) -> Result<Vec<Review>, AppError> {
        let mut records = self.list_dir(&self.project_dir(project_path)).await?;
        records.retain(|(review, _)| !matches!(review.status, ReviewStatus::Approved));
        records.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(records.into_iter().map(|(review, _)| review).collect())
    }

    /// The single most-recently-modified record in a project (or global)
    /// directory, regardless of status.
    pub async fn latest(&self, project_path: Option<&str>) -> Result<Option<Review>, AppError> {
        let dir = match project_path {
            Some(p) => self.project_dir(p),
            None => self.global_dir(),
        };
        let mut records = self.list_dir(&dir).await?;
        records.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(records.into_iter().next().map(|(review, _)| review))
    }

    async fn list_dir(&self, dir: &Path) -> Result<Vec<(Review, DateTime<Utc>)>, AppError> {
        let mut out = Vec::new();
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(err) => return Err(err.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let metadata = entry.metadata().await?;
            let modified: DateTime<Utc> = metadata.modified()?.into();
            let bytes = fs::read(&path).await?;
            let review: Review = serde_json::from_slice(&bytes)?;
            out.push((review, modified));
        }
        Ok(out)
    }
}
