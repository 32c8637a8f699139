//! Instant previews through an image-transformation CDN

use crate::error::{Result, StudioError};
use crate::remote::PreviewRenderer;
use crate::types::{Dimensions, Placement};
use reqwest::Url;

/// Builds overlay URLs of the form
/// `<base>/<backdrop>?overlay=<subject>&ox=<dx>&oy=<dy>&ow=<width>`
///
/// `ox`/`oy` are pixel offsets of the subject center from the canvas center
/// and `ow` is the rendered subject width in pixels.
#[derive(Debug, Clone)]
pub struct CdnPreviewRenderer {
    base: Url,
}

impl CdnPreviewRenderer {
    /// # Errors
    /// - `InvalidConfig` if `base_url` is not an absolute URL
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base = Url::parse(base_url).map_err(|e| {
            StudioError::invalid_config(format!("invalid CDN base URL '{}': {}", base_url, e))
        })?;
        if base.cannot_be_a_base() {
            return Err(StudioError::invalid_config(format!(
                "CDN base URL '{}' cannot carry paths",
                base_url
            )));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { base })
    }
}

impl PreviewRenderer for CdnPreviewRenderer {
    fn preview_url(
        &self,
        backdrop_id: &str,
        subject_id: &str,
        placement: &Placement,
        canvas: Dimensions,
    ) -> Result<String> {
        placement.validate()?;

        let width = (f64::from(canvas.width) * placement.scale).round() as i64;
        let dx = ((placement.x - 0.5) * f64::from(canvas.width)).round() as i64;
        let dy = ((placement.y - 0.5) * f64::from(canvas.height)).round() as i64;

        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| StudioError::invalid_config("CDN base URL cannot carry paths"))?
            .pop_if_empty()
            .push(backdrop_id);
        url.query_pairs_mut()
            .append_pair("overlay", subject_id)
            .append_pair("ox", &dx.to_string())
            .append_pair("oy", &dy.to_string())
            .append_pair("ow", &width.to_string());
        Ok(url.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_url_parameters() {
        let renderer = CdnPreviewRenderer::new("https://cdn.example.com/render").unwrap();
        let url = renderer
            .preview_url(
                "marble",
                "shoe 1.jpg",
                &Placement::new(0.75, 0.5, 0.4).unwrap(),
                Dimensions::new(1000, 800),
            )
            .unwrap();
        assert_eq!(
            url,
            "https://cdn.example.com/render/marble?overlay=shoe+1.jpg&ox=250&oy=0&ow=400"
        );
    }

    #[test]
    fn test_rejects_bad_base_and_placement() {
        assert!(CdnPreviewRenderer::new("not a url").is_err());
        assert!(CdnPreviewRenderer::new("mailto:studio@example.com").is_err());

        let renderer = CdnPreviewRenderer::new("https://cdn.example.com/").unwrap();
        let bad = Placement {
            x: 2.0,
            y: 0.5,
            scale: 0.5,
        };
        assert!(renderer
            .preview_url("b", "s", &bad, Dimensions::new(10, 10))
            .is_err());
    }
}
