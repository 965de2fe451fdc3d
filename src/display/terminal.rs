// src/display/terminal.rs
//! Terminal output for the command line tool

use crate::{
    cache::{SaveHandle, SaveProgress, SaveReport, SavedMapEntry},
    error::Result,
    tiles::SaveStats,
};
use crossterm::{
    cursor::{Hide, MoveToColumn, Show},
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{Clear, ClearType},
};
use std::{
    collections::BTreeMap,
    io::{self, Write},
    time::Duration,
};
use tokio::time::sleep;

const BAR_WIDTH: usize = 40;

pub struct TerminalDisplay;

impl TerminalDisplay {
    pub fn new() -> Self {
        Self
    }

    /// Redraw a progress bar until the save has drained.
    pub async fn run_progress(&self, handle: &SaveHandle) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(stdout, Hide)?;

        loop {
            let progress = handle.progress();
            self.render_progress(&mut stdout, handle.name(), &progress)?;
            stdout.flush()?;
            if handle.is_finished() || progress.is_done() {
                break;
            }
            sleep(Duration::from_millis(200)).await;
        }

        execute!(stdout, Show, Print("\n"))?;
        Ok(())
    }

    pub fn render_progress(&self, stdout: &mut impl Write, name: &str, progress: &SaveProgress) -> Result<()> {
        let filled = BAR_WIDTH * progress.percent as usize / 100;
        let bar = format!("{}{}", "#".repeat(filled), ".".repeat(BAR_WIDTH - filled));

        execute!(
            stdout,
            MoveToColumn(0),
            Clear(ClearType::CurrentLine),
            SetForegroundColor(Color::Green),
            Print(format!("[{}]", bar)),
            ResetColor,
            Print(format!(
                " {:>3}% ({}/{}) {}",
                progress.percent, progress.completed, progress.total, name
            ))
        )?;
        Ok(())
    }

    pub fn render_save_stats(&self, stdout: &mut impl Write, stats: &SaveStats) -> Result<()> {
        self.render_header(stdout, "DOWNLOAD ESTIMATE")?;
        execute!(
            stdout,
            Print(format!("  Tiles:     {:>12}\n", stats.tile_count)),
            Print(format!("  Size:      {:>12}\n", stats.human_size)),
            Print(format!("  Max size:  {:>12}\n", stats.max_human_size))
        )?;

        let (colour, verdict) = if stats.allowed {
            (Color::Green, "OK to save")
        } else {
            (Color::Red, "Download size too large")
        };
        execute!(
            stdout,
            SetForegroundColor(colour),
            Print(format!("  {}\n", verdict)),
            ResetColor
        )?;
        Ok(())
    }

    pub fn render_saved_maps(&self, stdout: &mut impl Write, maps: &BTreeMap<String, SavedMapEntry>) -> Result<()> {
        self.render_header(stdout, "SAVED MAPS")?;

        if maps.is_empty() {
            execute!(stdout, Print("  No saved maps\n"))?;
            return Ok(());
        }

        for (name, entry) in maps {
            let created = match entry.created {
                Some(ts) => ts.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                None => "downloading".to_string(),
            };
            execute!(
                stdout,
                Print(format!("  {:<24} {:>6} tiles  {}\n", name, entry.tile_count(), created))
            )?;
        }
        Ok(())
    }

    pub fn render_map_details(&self, stdout: &mut impl Write, name: &str, entry: &SavedMapEntry) -> Result<()> {
        self.render_header(stdout, name)?;
        let b = &entry.bounds;
        execute!(
            stdout,
            Print(format!(
                "  Centre:    {:.1}, {:.1} (zoom {})\n",
                entry.poi.centre.lon, entry.poi.centre.lat, entry.poi.zoom
            )),
            Print(format!(
                "  Bounds:    {:.1}, {:.1}, {:.1}, {:.1}\n",
                b.left, b.bottom, b.right, b.top
            )),
            Print(format!("  Tiles:     {}\n", entry.tile_count()))
        )?;

        let mut zooms: BTreeMap<u8, usize> = BTreeMap::new();
        for tile in &entry.images {
            *zooms.entry(tile.zoom).or_default() += 1;
        }
        for (zoom, count) in zooms {
            execute!(stdout, Print(format!("    zoom {:>2}: {}\n", zoom, count)))?;
        }
        Ok(())
    }

    pub fn render_report(&self, stdout: &mut impl Write, report: &SaveReport) -> Result<()> {
        let failed = report.failed_count();
        let colour = if failed == 0 { Color::Green } else { Color::Yellow };
        execute!(
            stdout,
            SetForegroundColor(colour),
            Print(format!(
                "Saved {}: {} of {} tiles",
                report.name,
                report.persisted_count(),
                report.total
            )),
            ResetColor
        )?;
        if failed > 0 {
            execute!(stdout, Print(format!(", {} failed", failed)))?;
        }
        if report.entry.is_none() {
            execute!(stdout, Print(" (not recorded)"))?;
        }
        execute!(stdout, Print("\n"))?;
        Ok(())
    }

    fn render_header(&self, stdout: &mut impl Write, title: &str) -> Result<()> {
        execute!(
            stdout,
            SetForegroundColor(Color::Yellow),
            Print(format!("{}:\n", title)),
            ResetColor
        )?;
        Ok(())
    }
}

impl Default for TerminalDisplay {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{PointOfInterest, TileRef};
    use crate::tiles::{GeographicExtent, LonLat, TileCoordinate};

    fn text(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_progress_bar() {
        let mut out = Vec::new();
        TerminalDisplay::new()
            .render_progress(&mut out, "Edinburgh", &SaveProgress::new(10, 20))
            .unwrap();
        let out = text(out);
        assert!(out.contains(&"#".repeat(20)));
        assert!(out.contains(" 50% (10/20) Edinburgh"));
    }

    #[test]
    fn test_saved_maps_listing() {
        let display = TerminalDisplay::new();

        let mut out = Vec::new();
        display.render_saved_maps(&mut out, &BTreeMap::new()).unwrap();
        assert!(text(out).contains("No saved maps"));

        let mut entry = SavedMapEntry::provisional(
            "Edinburgh",
            PointOfInterest {
                centre: LonLat::new(1.0, 2.0),
                zoom: 4,
            },
            GeographicExtent::new(0.0, 0.0, 1.0, 1.0),
        );
        entry.images.push(TileRef::new(TileCoordinate::new(4, 1, 1), "x".to_string()));
        let maps: BTreeMap<_, _> = [("Edinburgh".to_string(), entry.clone())].into_iter().collect();

        let mut out = Vec::new();
        display.render_saved_maps(&mut out, &maps).unwrap();
        let out = text(out);
        assert!(out.contains("Edinburgh"));
        assert!(out.contains("downloading"));

        let mut out = Vec::new();
        display.render_map_details(&mut out, "Edinburgh", &entry).unwrap();
        assert!(text(out).contains("zoom  4: 1"));
    }
}
