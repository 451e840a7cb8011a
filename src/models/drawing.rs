use serde::{Deserialize, Serialize};

use super::Point;

/// One continuous pen-down stroke.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Path {
    points: Vec<Point>,
}

impl Path {
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// All strokes of a session, in the order they were drawn.
///
/// Only the last path can grow, and only while the stroke is open. Once
/// `stop_stroke` closes a path it is never written again.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Drawing {
    paths: Vec<Path>,
    stroke_open: bool,
}

impl Drawing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paths(&self) -> &[Path] {
        &self.paths
    }

    pub fn is_stroke_open(&self) -> bool {
        self.stroke_open
    }

    pub fn start_stroke(&mut self) {
        self.paths.push(Path::default());
        self.stroke_open = true;
    }

    pub fn stop_stroke(&mut self) {
        self.stroke_open = false;
    }

    /// Appends to the open stroke. Returns false when no stroke is open.
    pub fn append(&mut self, point: Point) -> bool {
        if !self.stroke_open {
            return false;
        }
        match self.paths.last_mut() {
            Some(path) => {
                path.points.push(point);
                true
            }
            None => false,
        }
    }

    pub fn path_lengths(&self) -> Vec<usize> {
        self.paths.iter().map(Path::len).collect()
    }

    pub fn point_count(&self) -> usize {
        self.paths.iter().map(Path::len).sum()
    }

    pub fn last_point(&self) -> Option<Point> {
        self.paths.iter().rev().find_map(|path| path.points.last().copied())
    }

    pub fn is_empty(&self) -> bool {
        self.point_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn points_are_dropped_while_pen_is_up() {
        let mut drawing = Drawing::new();
        assert!(!drawing.append(Point::new(1.0, 1.0)));

        drawing.start_stroke();
        assert!(drawing.append(Point::new(1.0, 1.0)));
        drawing.stop_stroke();
        assert!(!drawing.append(Point::new(2.0, 2.0)));

        assert_eq!(drawing.path_lengths(), vec![1]);
    }

    #[test]
    fn closed_paths_are_not_reopened() {
        let mut drawing = Drawing::new();
        drawing.start_stroke();
        drawing.append(Point::new(1.0, 1.0));
        drawing.stop_stroke();
        drawing.start_stroke();
        drawing.append(Point::new(5.0, 5.0));

        assert_eq!(drawing.path_lengths(), vec![1, 1]);
        assert_eq!(drawing.paths()[0].points(), &[Point::new(1.0, 1.0)]);
        assert_eq!(drawing.last_point(), Some(Point::new(5.0, 5.0)));
    }
}
