//! Placement math: normalized placement record to canvas rectangle

use crate::error::{Result, StudioError};
use crate::types::{Dimensions, Placement, Rect};

/// Resolves where and how large a subject renders on a canvas
pub struct PlacementResolver;

impl PlacementResolver {
    /// Compute the subject rectangle for a placement
    ///
    /// Width is `canvas.width * scale`, height follows the subject's aspect
    /// ratio, and `placement.x`/`placement.y` anchor the rectangle's center.
    /// The result is not clamped; it may extend past any canvas edge.
    ///
    /// # Errors
    /// - `Format` when the subject or canvas has a zero dimension
    pub fn resolve(subject: Dimensions, canvas: Dimensions, placement: &Placement) -> Result<Rect> {
        let aspect = subject.aspect_ratio().ok_or_else(|| {
            StudioError::format(format!("cannot place an empty {} subject", subject))
        })?;
        if canvas.is_empty() {
            return Err(StudioError::format(format!(
                "cannot place a subject on an empty {} canvas",
                canvas
            )));
        }

        let canvas_width = f64::from(canvas.width);
        let canvas_height = f64::from(canvas.height);

        let width = canvas_width * placement.scale;
        let height = width / aspect;
        let x = placement.x * canvas_width - width / 2.0;
        let y = placement.y * canvas_height - height / 2.0;

        Ok(Rect::new(x, y, width, height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_reference_case() {
        let rect = PlacementResolver::resolve(
            Dimensions::new(200, 100),
            Dimensions::new(1000, 1000),
            &Placement::new(0.5, 0.5, 0.4).unwrap(),
        )
        .unwrap();
        // y = 0.5 * 1000 - 200 / 2
        assert_eq!(rect, Rect::new(300.0, 400.0, 400.0, 200.0));
    }

    #[test]
    fn test_aspect_follows_subject_not_canvas() {
        let rect = PlacementResolver::resolve(
            Dimensions::new(300, 600),
            Dimensions::new(1600, 900),
            &Placement::new(0.25, 0.5, 0.25).unwrap(),
        )
        .unwrap();
        assert!((rect.width - 400.0).abs() < 1e-9);
        assert!((rect.height - 800.0).abs() < 1e-9);
        assert!((rect.x - 200.0).abs() < 1e-9);
        assert!((rect.y - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_clamping_at_edges() {
        let rect = PlacementResolver::resolve(
            Dimensions::new(100, 100),
            Dimensions::new(500, 500),
            &Placement::new(0.0, 1.0, 1.0).unwrap(),
        )
        .unwrap();
        assert!((rect.x + 250.0).abs() < 1e-9);
        assert!((rect.bottom() - 750.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_dimensions_are_format_errors() {
        let placement = Placement::default();
        assert!(matches!(
            PlacementResolver::resolve(Dimensions::new(0, 10), Dimensions::new(10, 10), &placement),
            Err(StudioError::Format(_))
        ));
        assert!(matches!(
            PlacementResolver::resolve(Dimensions::new(10, 10), Dimensions::new(10, 0), &placement),
            Err(StudioError::Format(_))
        ));
    }
}
