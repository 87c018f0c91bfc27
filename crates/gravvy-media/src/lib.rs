use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Kinds of uploaded media and the folder each lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Avatar,
    ClipPhoto,
    ClipMp4,
}

impl MediaKind {
    pub fn root(self) -> &'static str {
        match self {
            Self::Avatar => "img/a",
            Self::ClipPhoto => "img/c",
            Self::ClipMp4 => "vid/c",
        }
    }
}

/// Derived thumbnails. These are rendered by an external image pipeline into
/// the cache folder next to the media root; this crate only knows where they
/// live so it can link and delete them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Thumbnail {
    Avatar,
    VideoPhoto,
    VideoPhotoSmall,
    ClipPhoto,
}

impl Thumbnail {
    pub fn name(self) -> &'static str {
        match self {
            Self::Avatar => "avatar_thumbnail",
            Self::VideoPhoto => "photo_thumbnail",
            Self::VideoPhotoSmall => "photo_small_thumbnail",
            Self::ClipPhoto => "clip_photo_thumbnail",
        }
    }
}

/// ASCII slug: lowercase alphanumerics separated by single hyphens.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_hyphen = false;
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }
    slug
}

/// Manages on-disk media storage.
///
/// Sources are stored at `{root}/{kind}/{slug}_{timestamp}_{tag}.{ext}` and
/// their thumbnails at `{root}/CACHE/images/{source stem}/{thumbnail}.jpg`.
pub struct MediaStore {
    root: PathBuf,
    base_url: String,
}

impl MediaStore {
    pub async fn new(root: PathBuf, base_url: &str) -> Result<Self> {
        fs::create_dir_all(&root).await?;
        info!("Media storage directory: {}", root.display());
        Ok(Self {
            root,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Relative path for a new upload of `filename`.
    pub fn upload_path(&self, kind: MediaKind, filename: &str, now: DateTime<Utc>) -> String {
        let base = Path::new(filename)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("");
        let (stem, ext) = match base.rsplit_once('.') {
            Some((stem, ext)) => (stem, ext),
            None => (base, ""),
        };

        let mut slug = slugify(stem);
        if slug.is_empty() {
            slug.push_str("file");
        }
        let ext: String = ext
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        let ext = if ext.is_empty() { "bin".to_string() } else { ext };

        let tag = uuid::Uuid::new_v4().simple().to_string();
        format!(
            "{}/{}_{}_{}.{}",
            kind.root(),
            slug,
            now.format("%Y%m%dT%H%M%S"),
            &tag[..6],
            ext
        )
    }

    /// Absolute path of a stored file. Rejects paths escaping the root.
    pub fn file_path(&self, relative: &str) -> Result<PathBuf> {
        let rel = Path::new(relative);
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("Invalid media path: {}", relative);
        }
        Ok(self.root.join(rel))
    }

    /// Write an upload and return its relative path.
    pub async fn save(
        &self,
        kind: MediaKind,
        filename: &str,
        data: &[u8],
        now: DateTime<Utc>,
    ) -> Result<String> {
        let relative = self.upload_path(kind, filename, now);
        let path = self.file_path(&relative)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&path).await?;
        file.write_all(data).await?;
        file.flush().await?;

        debug!("Stored {} ({} bytes)", relative, data.len());
        Ok(relative)
    }

    pub fn url(&self, relative: &str) -> String {
        format!("{}/{}", self.base_url, relative)
    }

    /// Relative path of a source's thumbnail.
    pub fn thumbnail_path(&self, source: &str, thumbnail: Thumbnail) -> String {
        let stem = source.rsplit_once('.').map(|(s, _)| s).unwrap_or(source);
        format!("CACHE/images/{}/{}.jpg", stem, thumbnail.name())
    }

    /// Public URL of a thumbnail, or an empty string when there is no source.
    pub fn thumbnail_url(&self, source: Option<&str>, thumbnail: Thumbnail) -> String {
        match source {
            Some(source) if !source.is_empty() => {
                self.url(&self.thumbnail_path(source, thumbnail))
            }
            _ => String::new(),
        }
    }

    /// Delete a stored file. Missing files are not an error.
    pub async fn delete_file(&self, relative: &str) -> Result<()> {
        let path = self.file_path(relative)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted media file {}", relative);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Media file {} already gone", relative);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the given thumbnails of a source, leaving the source itself.
    pub async fn delete_thumbnails(&self, source: &str, thumbnails: &[Thumbnail]) -> Result<()> {
        for &thumbnail in thumbnails {
            self.delete_file(&self.thumbnail_path(source, thumbnail))
                .await?;
        }
        Ok(())
    }

    /// Delete an image: thumbnails first, then the source. Deleting the source
    /// first would orphan the cached thumbnails.
    pub async fn delete_image(&self, source: &str, thumbnails: &[Thumbnail]) -> Result<()> {
        self.delete_thumbnails(source, thumbnails).await?;
        self.delete_file(source).await
    }

    pub async fn delete_avatar(&self, source: &str) -> Result<()> {
        self.delete_image(source, &[Thumbnail::Avatar]).await
    }

    /// Delete a clip's photo (with its thumbnail) and its mp4.
    pub async fn delete_clip_files(&self, photo: &str, mp4: &str) -> Result<()> {
        self.delete_image(photo, &[Thumbnail::ClipPhoto]).await?;
        self.delete_file(mp4).await
    }

    /// Drop the thumbnails a video derived from a lead clip photo. The photo
    /// itself belongs to the clip.
    pub async fn delete_video_photo_cache(&self, photo: &str) -> Result<()> {
        self.delete_thumbnails(photo, &[Thumbnail::VideoPhoto, Thumbnail::VideoPhotoSmall])
            .await
    }
}
