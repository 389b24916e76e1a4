//! Picks the stored image that best serves a requested size and points it at
//! the CDN.

use tracing::debug;

use crate::domain::image::{AttachmentId, AttachmentMeta, Dimensions, ImageSizeMeta};

use super::rewriter::CdnRewriter;

/// Size asked for by the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestedSize {
    /// A registered size such as `thumbnail` or `large`.
    Named(String),
    Exact(Dimensions),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownsizedImage {
    pub url: String,
    pub width: u32,
    pub height: u32,
    /// Whether an intermediate size was chosen over the full image.
    pub intermediate: bool,
}

impl CdnRewriter<'_> {
    /// CDN source for `attachment` at `size`.
    ///
    /// `None` when the attachment has no usable metadata or the chosen file
    /// would be served from its original URL anyway.
    pub fn downsize(&self, attachment: AttachmentId, size: &RequestedSize) -> Option<DownsizedImage> {
        let meta = match self.attachments().metadata(attachment) {
            Ok(Some(meta)) if !meta.file.is_empty() => meta,
            Ok(_) => return None,
            Err(err) => {
                debug!(attachment, error = %err, "Attachment metadata unavailable");
                return None;
            }
        };

        let (file, width, height, intermediate) = match pick_size(&meta, size) {
            Some(chosen) => {
                let file = if chosen.file.contains('/') {
                    chosen.file.clone()
                } else {
                    format!("{}{}", meta.directory(), chosen.file)
                };
                (file, chosen.width, chosen.height, true)
            }
            None => (meta.file.clone(), meta.width, meta.height, false),
        };

        let source = format!("{}/{}", self.origin().uploads_url(), file);
        let url = self.rewrite_url(&source);
        if url == source {
            return None;
        }
        Some(DownsizedImage {
            url,
            width,
            height,
            intermediate,
        })
    }
}

/// Named sizes must exist in the metadata. Dimensions prefer an exact match,
/// then the smallest size covering both sides.
fn pick_size<'m>(meta: &'m AttachmentMeta, size: &RequestedSize) -> Option<&'m ImageSizeMeta> {
    match size {
        RequestedSize::Named(name) => meta.sizes.get(name).filter(|size| !size.file.is_empty()),
        RequestedSize::Exact(wanted) => {
            let candidates: Vec<&ImageSizeMeta> = meta
                .sizes
                .values()
                .filter(|candidate| !candidate.file.is_empty())
                .collect();
            candidates
                .iter()
                .find(|candidate| {
                    candidate.width == wanted.width && candidate.height == wanted.height
                })
                .or_else(|| {
                    candidates
                        .iter()
                        .filter(|candidate| {
                            candidate.width >= wanted.width && candidate.height >= wanted.height
                        })
                        .min_by_key(|candidate| {
                            u64::from(candidate.width) * u64::from(candidate.height)
                        })
                })
                .copied()
        }
    }
}
