use crate::Message;
use iced::{
    mouse,
    widget::canvas::{self, Frame, Geometry, Path, Stroke},
    Color, Point, Rectangle, Renderer, Size, Theme,
};
use minewatchcore::model::{Coordinates, Detection, Status};

const MARGIN: f32 = 14.0;

/// Equirectangular fit of a set of coordinates onto a canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    min_lat: f64,
    max_lat: f64,
    min_lng: f64,
    max_lng: f64,
}

impl Projection {
    pub fn fit<'a>(coordinates: impl IntoIterator<Item = &'a Coordinates>) -> Option<Self> {
        coordinates.into_iter().fold(None, |bounds, c| {
            Some(match bounds {
                None => Projection {
                    min_lat: c.lat,
                    max_lat: c.lat,
                    min_lng: c.lng,
                    max_lng: c.lng,
                },
                Some(p) => Projection {
                    min_lat: p.min_lat.min(c.lat),
                    max_lat: p.max_lat.max(c.lat),
                    min_lng: p.min_lng.min(c.lng),
                    max_lng: p.max_lng.max(c.lng),
                },
            })
        })
    }

    /// North is up. A degenerate span collapses to the centre of that axis.
    pub fn to_canvas(&self, coordinates: &Coordinates, size: Size) -> Point {
        let width = (size.width - 2.0 * MARGIN).max(0.0);
        let height = (size.height - 2.0 * MARGIN).max(0.0);
        let x = normalize(coordinates.lng, self.min_lng, self.max_lng);
        let y = normalize(coordinates.lat, self.min_lat, self.max_lat);
        Point::new(
            MARGIN + x as f32 * width,
            MARGIN + (1.0 - y as f32) * height,
        )
    }
}

fn normalize(value: f64, min: f64, max: f64) -> f64 {
    let span = max - min;
    if span <= f64::EPSILON {
        0.5
    } else {
        ((value - min) / span).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone)]
struct Marker {
    id: String,
    coordinates: Coordinates,
    status: Status,
    confidence: f64,
}

/// Filtered detections plotted by latitude and longitude.
#[derive(Debug, Clone)]
pub struct DetectionMap {
    markers: Vec<Marker>,
    selected: Option<String>,
    newest: Option<String>,
}

impl DetectionMap {
    pub fn new(detections: &[Detection], selected: Option<&str>, newest: Option<&str>) -> Self {
        Self {
            markers: detections
                .iter()
                .map(|d| Marker {
                    id: d.id.clone(),
                    coordinates: d.coordinates,
                    status: d.status,
                    confidence: d.confidence,
                })
                .collect(),
            selected: selected.map(str::to_owned),
            newest: newest.map(str::to_owned),
        }
    }
}

pub fn status_color(status: Status) -> Color {
    match status {
        Status::Confirmed => Color::from_rgb(0.92, 0.3, 0.25),
        Status::UnderReview => Color::from_rgb(0.95, 0.65, 0.2),
        Status::Rejected => Color::from_rgb(0.5, 0.5, 0.55),
    }
}

impl canvas::Program<Message> for DetectionMap {
    type State = ();

    fn draw(
        &self,
        _state: &Self::State,
        renderer: &Renderer,
        _theme: &Theme,
        bounds: Rectangle,
        _cursor: mouse::Cursor,
    ) -> Vec<Geometry> {
        let mut frame = Frame::new(renderer, bounds.size());
        frame.fill_rectangle(
            Point::ORIGIN,
            bounds.size(),
            Color::from_rgb(0.02, 0.02, 0.04),
        );

        let grid = Path::new(|builder| {
            for step in 1..4 {
                let x = bounds.width * step as f32 / 4.0;
                let y = bounds.height * step as f32 / 4.0;
                builder.move_to(Point::new(x, 0.0));
                builder.line_to(Point::new(x, bounds.height));
                builder.move_to(Point::new(0.0, y));
                builder.line_to(Point::new(bounds.width, y));
            }
        });
        frame.stroke(
            &grid,
            Stroke::default()
                .with_color(Color::from_rgb(0.18, 0.18, 0.24))
                .with_width(1.0),
        );

        let Some(projection) = Projection::fit(self.markers.iter().map(|m| &m.coordinates)) else {
            return vec![frame.into_geometry()];
        };

        for marker in &self.markers {
            let center = projection.to_canvas(&marker.coordinates, bounds.size());
            let radius = 3.0 + marker.confidence.clamp(0.0, 1.0) as f32 * 4.0;
            let dot = Path::new(|builder| builder.circle(center, radius));
            frame.fill(&dot, status_color(marker.status));

            let ring = if self.selected.as_deref() == Some(marker.id.as_str()) {
                Some(Color::WHITE)
            } else if self.newest.as_deref() == Some(marker.id.as_str()) {
                Some(Color::from_rgb(0.18, 0.72, 0.89))
            } else {
                None
            };
            if let Some(color) = ring {
                let outline = Path::new(|builder| builder.circle(center, radius + 4.0));
                frame.stroke(&outline, Stroke::default().with_color(color).with_width(2.0));
            }
        }

        vec![frame.into_geometry()]
    }
}
