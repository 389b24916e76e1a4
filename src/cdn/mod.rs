//! Image CDN URL rewriting.
//!
//! Same-origin image URLs are sent to one of four CDN shards
//! (`i0`..`i3.<cdn domain>`) chosen by hashing the image host, with generated
//! thumbnail suffixes turned into `resize` hints.

mod attachments;
mod downsize;
mod html;
mod rewriter;

pub use attachments::AttachmentCache;
pub use downsize::{DownsizedImage, RequestedSize};
pub use html::{IMAGE_ATTRIBUTES, rewrite_html};
pub use rewriter::{CdnRewriter, SrcsetSource};
