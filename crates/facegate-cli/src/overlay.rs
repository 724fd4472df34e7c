//! Terminal overlay for a running collection window.
//!
//! Renders the daemon's per-tick CollectionTick payloads as a character
//! grid: face bounding box, landmark points, and a progress header.

use crossterm::{cursor, execute, terminal};
use serde::Deserialize;
use std::io::{self, Write};

const DEFAULT_COLS: usize = 64;
const DEFAULT_ROWS: usize = 18;

/// Wire mirror of the daemon's tick event.
#[derive(Debug, Deserialize)]
pub struct TickPayload {
    pub elapsed_ms: u64,
    pub collected: usize,
    pub frame_width: u32,
    pub frame_height: u32,
    pub detection: Option<TickDetection>,
}

#[derive(Debug, Deserialize)]
pub struct TickDetection {
    pub bounding_box: Box2D,
    pub landmarks: Vec<(f32, f32)>,
}

#[derive(Debug, Deserialize)]
pub struct Box2D {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Draws tick payloads full-screen, one frame per tick.
pub struct OverlayRenderer {
    cols: usize,
    rows: usize,
}

impl OverlayRenderer {
    pub fn from_terminal() -> Self {
        let (cols, rows) = terminal::size()
            .map(|(w, h)| (w as usize, h as usize))
            .unwrap_or((DEFAULT_COLS, DEFAULT_ROWS + 2));
        Self {
            cols: cols.min(DEFAULT_COLS),
            rows: rows.saturating_sub(2).min(DEFAULT_ROWS),
        }
    }

    /// Render one tick payload. Malformed payloads are ignored.
    pub fn draw(&self, payload: &str) -> io::Result<()> {
        let Ok(tick) = serde_json::from_str::<TickPayload>(payload) else {
            return Ok(());
        };
        let lines = render_grid(&tick, self.cols, self.rows);

        let mut out = io::stdout();
        execute!(
            out,
            cursor::MoveTo(0, 0),
            terminal::Clear(terminal::ClearType::All)
        )?;
        for line in lines {
            writeln!(out, "{line}")?;
        }
        out.flush()
    }

    /// Wipe the overlay before printing the final outcome.
    pub fn clear(&self) -> io::Result<()> {
        execute!(
            io::stdout(),
            cursor::MoveTo(0, 0),
            terminal::Clear(terminal::ClearType::All)
        )
    }
}

/// Pure grid renderer: header line followed by `rows` grid lines.
fn render_grid(tick: &TickPayload, cols: usize, rows: usize) -> Vec<String> {
    let mut grid = vec![vec![' '; cols]; rows];

    if let Some(det) = &tick.detection {
        draw_box(&mut grid, det, tick.frame_width, tick.frame_height);
        draw_landmarks(&mut grid, det, tick.frame_width, tick.frame_height);
    }

    let header = match &tick.detection {
        Some(det) => format!(
            "collecting  {:>5} ms  {} sample(s)  confidence {:.2}",
            tick.elapsed_ms, tick.collected, det.bounding_box.confidence
        ),
        None => format!(
            "collecting  {:>5} ms  {} sample(s)  no face in frame",
            tick.elapsed_ms, tick.collected
        ),
    };

    let mut lines = Vec::with_capacity(rows + 1);
    lines.push(header);
    lines.extend(grid.into_iter().map(|row| row.into_iter().collect()));
    lines
}

fn draw_box(grid: &mut [Vec<char>], det: &TickDetection, frame_w: u32, frame_h: u32) {
    let rows = grid.len();
    let cols = grid[0].len();
    let b = &det.bounding_box;

    let x0 = scale(b.x, frame_w, cols);
    let x1 = scale(b.x + b.width, frame_w, cols);
    let y0 = scale(b.y, frame_h, rows);
    let y1 = scale(b.y + b.height, frame_h, rows);

    for x in x0..=x1 {
        grid[y0][x] = '-';
        grid[y1][x] = '-';
    }
    for row in grid.iter_mut().take(y1 + 1).skip(y0) {
        row[x0] = '|';
        row[x1] = '|';
    }
    grid[y0][x0] = '+';
    grid[y0][x1] = '+';
    grid[y1][x0] = '+';
    grid[y1][x1] = '+';
}

fn draw_landmarks(grid: &mut [Vec<char>], det: &TickDetection, frame_w: u32, frame_h: u32) {
    let rows = grid.len();
    let cols = grid[0].len();
    for &(lx, ly) in &det.landmarks {
        let x = scale(lx, frame_w, cols);
        let y = scale(ly, frame_h, rows);
        if grid[y][x] == ' ' {
            grid[y][x] = '.';
        }
    }
}

fn scale(v: f32, frame: u32, cells: usize) -> usize {
    if frame == 0 || cells == 0 {
        return 0;
    }
    ((v / frame as f32) * cells as f32)
        .floor()
        .clamp(0.0, (cells - 1) as f32) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick_with_box(x: f32, y: f32, w: f32, h: f32, landmarks: Vec<(f32, f32)>) -> TickPayload {
        TickPayload {
            elapsed_ms: 1200,
            collected: 4,
            frame_width: 640,
            frame_height: 480,
            detection: Some(TickDetection {
                bounding_box: Box2D {
                    x,
                    y,
                    width: w,
                    height: h,
                    confidence: 0.91,
                },
                landmarks,
            }),
        }
    }

    #[test]
    fn header_reports_progress() {
        let tick = tick_with_box(100.0, 100.0, 200.0, 200.0, vec![]);
        let lines = render_grid(&tick, 64, 18);
        assert!(lines[0].contains("1200 ms"));
        assert!(lines[0].contains("4 sample(s)"));
        assert_eq!(lines.len(), 19);
    }

    #[test]
    fn box_corners_are_drawn() {
        let tick = tick_with_box(160.0, 120.0, 320.0, 240.0, vec![]);
        let lines = render_grid(&tick, 64, 18);
        let y0 = 120 * 18 / 480; // 4
        let y1 = 360 * 18 / 480; // 13
        let x0 = 160 * 64 / 640; // 16
        let x1 = 480 * 64 / 640; // 48
        let grid: Vec<Vec<char>> = lines[1..].iter().map(|l| l.chars().collect()).collect();
        assert_eq!(grid[y0][x0], '+');
        assert_eq!(grid[y0][x1], '+');
        assert_eq!(grid[y1][x0], '+');
        assert_eq!(grid[y1][x1], '+');
        assert_eq!(grid[y0][(x0 + x1) / 2], '-');
        assert_eq!(grid[(y0 + y1) / 2][x0], '|');
    }

    #[test]
    fn landmarks_are_plotted_inside_the_box() {
        let tick = tick_with_box(0.0, 0.0, 640.0, 480.0, vec![(320.0, 240.0)]);
        let lines = render_grid(&tick, 64, 18);
        let grid: Vec<Vec<char>> = lines[1..].iter().map(|l| l.chars().collect()).collect();
        assert_eq!(grid[9][32], '.');
    }

    #[test]
    fn out_of_frame_coordinates_are_clamped() {
        let tick = tick_with_box(600.0, 460.0, 200.0, 200.0, vec![(900.0, 900.0)]);
        // Must not panic on boxes or landmarks past the frame edge.
        let lines = render_grid(&tick, 64, 18);
        assert_eq!(lines.len(), 19);
    }

    #[test]
    fn no_detection_renders_empty_grid() {
        let tick = TickPayload {
            elapsed_ms: 400,
            collected: 0,
            frame_width: 640,
            frame_height: 480,
            detection: None,
        };
        let lines = render_grid(&tick, 64, 18);
        assert!(lines[0].contains("no face in frame"));
        assert!(lines[1..].iter().all(|l| l.chars().all(|c| c == ' ')));
    }

    #[test]
    fn malformed_payload_is_ignored() {
        let renderer = OverlayRenderer { cols: 8, rows: 4 };
        assert!(renderer.draw("{not json").is_ok());
    }
}
