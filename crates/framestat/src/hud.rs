//! On-screen stats overlay.
//!
//! The HUD only reads: histories, live accumulator values and the display
//! settings. Drawing goes through [`Canvas`] so any renderer can host it.

use std::sync::Arc;

use framestat_core::{StatId, StatKind};
use hashbrown::HashMap;

use crate::accumulator::{FrameValue, ValueStat};
use crate::clock::CycleClock;
use crate::config::StatsConfig;
use crate::cycle::CycleNode;
use crate::manager::StatManager;

/// Which view the HUD draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    /// One block per visible group.
    #[default]
    Grouped,
    /// One thread's tree from a navigable node.
    Hierarchical,
    /// Only cycle stats over the slow threshold.
    Slow,
}

/// HUD display settings, changed by commands.
#[derive(Debug, Clone)]
pub struct DisplaySettings {
    pub mode: RenderMode,
    pub show_inclusive: bool,
    pub show_exclusive: bool,
    pub show_cycles: bool,
    pub show_counters: bool,
    pub slow_threshold_secs: f32,
    pub min_slow_duration_secs: f32,
    pub font_scale: f32,
    /// Node the hierarchical view starts at; the calling thread's root when
    /// unset.
    pub hierarchy_node: Option<Arc<CycleNode>>,
}

impl DisplaySettings {
    /// Defaults taken from the configuration.
    #[must_use]
    pub fn from_config(config: &StatsConfig) -> Self {
        Self {
            mode: RenderMode::Grouped,
            show_inclusive: true,
            show_exclusive: false,
            show_cycles: true,
            show_counters: true,
            slow_threshold_secs: config.slow_threshold_secs,
            min_slow_duration_secs: config.min_slow_duration_secs,
            font_scale: config.font_scale,
            hierarchy_node: None,
        }
    }
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self::from_config(&StatsConfig::default())
    }
}

/// Colors the HUD asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HudColor {
    Heading,
    Label,
    Value,
    Slow,
}

/// A surface the HUD draws on.
pub trait Canvas {
    /// Height of one text line at scale 1.
    fn text_height(&self) -> f32;

    fn draw_text(&mut self, x: f32, y: f32, text: &str, color: HudColor);

    fn draw_rect(&mut self, _x: f32, _y: f32, _width: f32, _height: f32, _color: HudColor) {}
}

/// Canvas that keeps the drawn text, one row per distinct `y`.
#[derive(Debug, Default, Clone)]
pub struct TextCanvas {
    cells: Vec<(f32, f32, String)>,
}

impl TextCanvas {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drawn rows top to bottom, cells joined left to right.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        let mut cells = self.cells.clone();
        cells.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
        let mut lines: Vec<(f32, String)> = Vec::new();
        for (y, _, text) in cells {
            match lines.last_mut() {
                Some((row, line)) if *row == y => {
                    line.push_str("  ");
                    line.push_str(&text);
                }
                _ => lines.push((y, text)),
            }
        }
        lines.into_iter().map(|(_, line)| line).collect()
    }

    /// Whether any row contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.cells.iter().any(|(_, _, text)| text.contains(needle))
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }
}

impl Canvas for TextCanvas {
    fn text_height(&self) -> f32 {
        1.0
    }

    fn draw_text(&mut self, x: f32, y: f32, text: &str, _color: HudColor) {
        self.cells.push((y, x, text.to_owned()));
    }
}

const NAME_WIDTH: f32 = 40.0;
const COLUMN_WIDTH: f32 = 14.0;

/// Renders the overlay. Keeps the slow view's last-exceeded times between
/// frames.
#[derive(Debug, Default)]
pub struct StatHud {
    slow_last_exceeded: HashMap<StatId, f64>,
    x: f32,
    y: f32,
}

struct Cursor<'c> {
    canvas: &'c mut dyn Canvas,
    x: f32,
    y: f32,
    line_height: f32,
}

impl Cursor<'_> {
    fn row(&mut self, cells: &[(&str, HudColor)]) {
        let mut x = self.x;
        for (i, (text, color)) in cells.iter().enumerate() {
            self.canvas.draw_text(x, self.y, text, *color);
            x += if i == 0 { NAME_WIDTH } else { COLUMN_WIDTH };
        }
        self.y += self.line_height;
    }

    fn owned_row(&mut self, label: &str, label_color: HudColor, values: &[String]) {
        let mut cells = vec![(label, label_color)];
        cells.extend(values.iter().map(|v| (v.as_str(), HudColor::Value)));
        self.row(&cells);
    }
}

impl StatHud {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw starting at `(x, y)` instead of the origin.
    #[must_use]
    pub fn at(mut self, x: f32, y: f32) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    /// Draw the overlay. Returns the `y` below the last row.
    pub fn render(&mut self, manager: &StatManager, canvas: &mut dyn Canvas) -> f32 {
        let display = manager.display();
        let line_height = canvas.text_height() * display.font_scale;
        let mut cursor = Cursor {
            canvas,
            x: self.x,
            y: self.y,
            line_height,
        };

        let (frame_time, fps) = manager.fps();
        cursor.owned_row(
            &format!("{fps:.1} fps"),
            HudColor::Heading,
            &[format!("{:.2} ms", frame_time * 1000.0)],
        );

        match display.mode {
            RenderMode::Grouped => render_grouped(manager, &display, &mut cursor),
            RenderMode::Hierarchical => render_hierarchy(manager, &display, &mut cursor),
            RenderMode::Slow => self.render_slow(manager, &display, &mut cursor),
        }
        cursor.y
    }

    fn render_slow(&mut self, manager: &StatManager, display: &DisplaySettings, cursor: &mut Cursor<'_>) {
        let now = manager.clock().seconds();
        let seconds_per_cycle = manager.seconds_per_cycle();
        let threshold = f64::from(display.slow_threshold_secs);
        let linger = f64::from(display.min_slow_duration_secs);

        let mut rows = Vec::new();
        for group in manager.groups() {
            for node in group.canonical_stats() {
                let seconds = f64::from(node.history().inclusive.most_recent()) * seconds_per_cycle;
                let slow = seconds > threshold;
                if slow {
                    self.slow_last_exceeded.insert(node.stat_id(), now);
                }
                let recent = self
                    .slow_last_exceeded
                    .get(&node.stat_id())
                    .is_some_and(|&last| now - last <= linger);
                if slow || recent {
                    rows.push((node, seconds, slow));
                }
            }
        }
        self.slow_last_exceeded
            .retain(|_, last| now - *last <= linger);

        cursor.owned_row(
            &format!("Slow stats (> {:.1} ms)", threshold * 1000.0),
            HudColor::Heading,
            &[],
        );
        for (node, seconds, slow) in rows {
            let color = if slow { HudColor::Slow } else { HudColor::Label };
            cursor.owned_row(
                node.info().name(),
                color,
                &[format!("{:.2} ms", seconds * 1000.0)],
            );
        }
    }
}

fn render_grouped(manager: &StatManager, display: &DisplaySettings, cursor: &mut Cursor<'_>) {
    let ms_per_cycle = manager.seconds_per_cycle() * 1000.0;
    for group in manager.groups().iter().filter(|g| g.is_visible()) {
        cursor.row(&[(group.name(), HudColor::Heading)]);

        let canonical: Vec<_> = group
            .canonical_stats()
            .into_iter()
            .filter(|node| node.info().is_visible())
            .collect();
        if display.show_cycles && !canonical.is_empty() {
            let mut heading = vec![("Cycle counters", HudColor::Heading)];
            if display.show_inclusive {
                heading.push(("ms", HudColor::Heading));
            }
            heading.push(("Calls", HudColor::Heading));
            cursor.row(&heading);
            for node in canonical {
                let history = node.history();
                let mut values = Vec::new();
                if display.show_inclusive {
                    values.push(format!("{:.2}", history.inclusive.average() * ms_per_cycle));
                }
                values.push(format!("{:.1}", history.calls.average()));
                cursor.owned_row(node.info().name(), HudColor::Label, &values);
            }
        }

        if !display.show_counters {
            continue;
        }
        for kind in [
            StatKind::DwordCounter,
            StatKind::FloatCounter,
            StatKind::DwordAccumulator,
            StatKind::FloatAccumulator,
            StatKind::MemoryCounter,
        ] {
            let stats: Vec<_> = group
                .values_of(kind)
                .filter(|stat| stat.info().is_visible())
                .collect();
            if stats.is_empty() {
                continue;
            }
            cursor.row(&value_heading(kind));
            for stat in stats {
                let values = value_columns(manager, stat);
                cursor.owned_row(stat.info().name(), HudColor::Label, &values);
            }
        }
    }
}

fn value_heading(kind: StatKind) -> Vec<(&'static str, HudColor)> {
    let labels: &[&'static str] = match kind {
        StatKind::DwordCounter | StatKind::FloatCounter => &["Counters", "Average", "Peak"],
        StatKind::MemoryCounter => &["Memory", "KB", "Peak KB", "% of region"],
        _ => &["Accumulators", "Value"],
    };
    labels.iter().map(|label| (*label, HudColor::Heading)).collect()
}

fn value_columns(manager: &StatManager, stat: &ValueStat) -> Vec<String> {
    match stat {
        ValueStat::Memory(gauge) => {
            let history = gauge.history();
            let available = manager.available_memory(gauge.region());
            let percent = if available > 0 {
                format!(
                    "{:.1}%",
                    f64::from(gauge.value()) * 100.0 / f64::from(available)
                )
            } else {
                "-".to_owned()
            };
            vec![
                format!("{:.1}", history.average() / 1024.0),
                format!("{:.1}", history.peak() / 1024.0),
                percent,
            ]
        }
        _ => match stat.history_summary() {
            Some((_, average, peak)) => vec![format!("{average:.2}"), format!("{peak:.2}")],
            None => match stat.value() {
                FrameValue::Dword(v) => vec![v.to_string()],
                FrameValue::Float(v) => vec![format!("{v:.2}")],
            },
        },
    }
}

fn render_hierarchy(manager: &StatManager, display: &DisplaySettings, cursor: &mut Cursor<'_>) {
    let Some(node) = display.hierarchy_node.clone().or_else(|| manager.thread_root()) else {
        cursor.row(&[("No samples on this thread", HudColor::Label)]);
        return;
    };
    let ms_per_cycle = manager.seconds_per_cycle() * 1000.0;

    let mut heading = vec![("Hierarchy", HudColor::Heading)];
    if display.show_inclusive {
        heading.push(("Incl ms", HudColor::Heading));
    }
    if display.show_exclusive {
        heading.push(("Excl ms", HudColor::Heading));
    }
    heading.push(("Calls", HudColor::Heading));
    cursor.row(&heading);

    let columns = |node: &CycleNode| {
        let history = node.history();
        let mut values = Vec::new();
        if display.show_inclusive {
            values.push(format!("{:.2}", history.inclusive.average() * ms_per_cycle));
        }
        if display.show_exclusive {
            values.push(format!("{:.2}", history.exclusive.average() * ms_per_cycle));
        }
        values.push(format!("{:.1}", history.calls.average()));
        values
    };

    let title = format!("{} (thread {})", node.info().name(), node.thread().0);
    cursor.owned_row(&title, HudColor::Heading, &columns(node.as_ref()));
    for (i, child) in node.children().iter().enumerate() {
        let label = format!("{}. {}", i + 1, child.info().name());
        cursor.owned_row(&label, HudColor::Label, &columns(child.as_ref()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::tests::{manager, HITS, INNER, MEM, OUTER, WORK};
    use crate::scope::CycleCounter;
    use framestat_core::{GroupId, MemoryRegion};

    #[test]
    fn hidden_groups_draw_nothing_but_the_fps_line() {
        let (manager, _clock) = manager();
        let mut canvas = TextCanvas::new();
        StatHud::new().render(&manager, &mut canvas);
        assert_eq!(canvas.lines().len(), 1);
        assert!(canvas.lines()[0].contains("fps"));
    }

    #[test]
    fn grouped_view_lists_canonical_and_value_stats() {
        let (manager, clock) = manager();
        manager.set_group_visible(GroupId::GAME, true);
        {
            let _work = CycleCounter::new(&manager, WORK);
            clock.advance(60_000);
        }
        manager.increment_dword(HITS, 4);
        manager.advance_frame();

        // Averages run over the whole 60-frame window.
        let mut canvas = TextCanvas::new();
        StatHud::new().render(&manager, &mut canvas);
        let lines = canvas.lines();
        assert!(lines.iter().any(|l| l == "Game"));
        assert!(lines.iter().any(|l| l.starts_with("Work") && l.contains("1.00")));
        assert!(lines.iter().any(|l| l.starts_with("Hits")));
        assert!(!canvas.contains("Mem"));
    }

    #[test]
    fn memory_rows_show_share_of_region() {
        let (manager, _clock) = manager();
        manager.set_group_visible(GroupId::MEMORY, true);
        manager.set_available_memory(MemoryRegion::Physical, 4096);
        manager.set_dword(MEM, 1024);
        manager.advance_frame();

        let mut canvas = TextCanvas::new();
        StatHud::new().render(&manager, &mut canvas);
        assert!(canvas.lines().iter().any(|l| l.starts_with("Mem") && l.contains("25.0%")));
    }

    #[test]
    fn hierarchy_numbers_children_of_the_root() {
        let (manager, clock) = manager();
        manager.update_display(|d| d.mode = RenderMode::Hierarchical);
        {
            let _outer = CycleCounter::new(&manager, OUTER);
            let _inner = CycleCounter::new(&manager, INNER);
            clock.advance(10);
        }
        manager.advance_frame();

        let mut canvas = TextCanvas::new();
        StatHud::new().render(&manager, &mut canvas);
        assert!(canvas.contains("Root (thread"));
        assert!(canvas.contains("1. Outer"));
        assert!(!canvas.contains("Inner"));
    }

    #[test]
    fn slow_stats_linger_for_the_minimum_duration() {
        let (manager, clock) = manager();
        manager.update_display(|d| {
            d.mode = RenderMode::Slow;
            d.slow_threshold_secs = 0.01;
            d.min_slow_duration_secs = 5.0;
        });
        let mut hud = StatHud::new();

        // 20 ms at a microsecond per cycle.
        {
            let _work = CycleCounter::new(&manager, WORK);
            clock.advance(20_000);
        }
        manager.advance_frame();
        let mut canvas = TextCanvas::new();
        hud.render(&manager, &mut canvas);
        assert!(canvas.contains("Work"));

        clock.advance_seconds(2.0);
        manager.advance_frame();
        canvas.clear();
        hud.render(&manager, &mut canvas);
        assert!(canvas.contains("Work"));

        clock.advance_seconds(10.0);
        manager.advance_frame();
        canvas.clear();
        hud.render(&manager, &mut canvas);
        assert!(!canvas.contains("Work"));
    }
}
