//! `STAT` console commands.

use std::path::Path;

use framestat_core::{GroupId, StatId};

use crate::hud::RenderMode;
use crate::manager::StatManager;

/// Where command results are written.
pub trait OutputDevice {
    fn log(&mut self, line: &str);
}

impl OutputDevice for Vec<String> {
    fn log(&mut self, line: &str) {
        self.push(line.to_owned());
    }
}

/// Writes command results to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingOutput;

impl OutputDevice for TracingOutput {
    fn log(&mut self, line: &str) {
        tracing::info!(target: "framestat::command", "{}", line);
    }
}

impl StatManager {
    /// Run one `STAT ...` command. Returns true when it was recognized and
    /// applied; unknown or malformed commands change nothing.
    pub fn exec(&self, command: &str, out: &mut dyn OutputDevice) -> bool {
        let mut tokens = command.split_whitespace();
        if !tokens
            .next()
            .is_some_and(|token| token.eq_ignore_ascii_case("stat"))
        {
            return false;
        }
        let Some(verb) = tokens.next() else {
            return false;
        };
        let args: Vec<&str> = tokens.collect();

        match verb.to_ascii_lowercase().as_str() {
            "name" => self.exec_name(&args, out),
            "inclusive" => {
                self.update_display(|d| d.show_inclusive = !d.show_inclusive);
                true
            }
            "exclusive" => {
                self.update_display(|d| d.show_exclusive = !d.show_exclusive);
                true
            }
            "cycles" => {
                self.update_display(|d| d.show_cycles = !d.show_cycles);
                true
            }
            "counters" => {
                self.update_display(|d| d.show_counters = !d.show_counters);
                true
            }
            "grouped" => {
                self.update_display(|d| d.mode = RenderMode::Grouped);
                true
            }
            "hier" | "hierarchy" => {
                self.update_display(|d| {
                    d.mode = if d.mode == RenderMode::Hierarchical {
                        RenderMode::Grouped
                    } else {
                        RenderMode::Hierarchical
                    };
                    d.hierarchy_node = None;
                });
                true
            }
            "slow" => self.exec_slow(&args),
            "nav" => self.exec_nav(&args),
            "list" => self.exec_list(&args, out),
            "save" => self.exec_save(&args, out),
            "none" => {
                for group in self.groups() {
                    self.set_group_visible(group.group_id(), false);
                }
                *self.active_set().lock() = None;
                true
            }
            "startfile" => match self.start_writing_stats_file(
                Some(args.join(" "))
                    .filter(|path| !path.is_empty())
                    .as_deref()
                    .map(Path::new),
            ) {
                Ok(path) => {
                    out.log(&format!("Writing stats to {}", path.display()));
                    true
                }
                Err(e) => {
                    out.log(&format!("Failed to start stats capture: {e}"));
                    false
                }
            },
            "stopfile" => {
                if self.stop_writing_stats_file() {
                    true
                } else {
                    out.log("No stats capture in progress");
                    false
                }
            }
            "fontscale" => match args.first().and_then(|a| a.parse::<f32>().ok()) {
                Some(scale) if scale > 0.0 => {
                    self.update_display(|d| d.font_scale = scale);
                    true
                }
                _ => false,
            },
            _ => {
                let name = std::iter::once(verb)
                    .chain(args.iter().copied())
                    .collect::<Vec<_>>()
                    .join(" ");
                self.toggle_group_or_set(&name, out)
            }
        }
    }

    fn exec_name(&self, args: &[&str], out: &mut dyn OutputDevice) -> bool {
        let name = args.join(" ");
        if name.is_empty() {
            return false;
        }
        let Some(stat) = self.stat_id_by_name(&name) else {
            out.log(&format!("Unknown stat: {name}"));
            return false;
        };
        self.set_stat_visibility(stat, !self.is_stat_visible(stat))
    }

    fn exec_slow(&self, args: &[&str]) -> bool {
        let mut values = [None, None];
        for (slot, arg) in values.iter_mut().zip(args) {
            match arg.parse::<f32>() {
                Ok(value) if value >= 0.0 => *slot = Some(value),
                _ => return false,
            }
        }
        self.update_display(|d| {
            d.mode = RenderMode::Slow;
            if let Some(threshold) = values[0] {
                d.slow_threshold_secs = threshold;
            }
            if let Some(min) = values[1] {
                d.min_slow_duration_secs = min;
            }
        });
        true
    }

    fn exec_nav(&self, args: &[&str]) -> bool {
        let Some(index) = args.first().and_then(|a| a.parse::<usize>().ok()) else {
            return false;
        };
        let display = self.display();
        if display.mode != RenderMode::Hierarchical {
            return false;
        }
        let Some(current) = display.hierarchy_node.or_else(|| self.thread_root()) else {
            return false;
        };
        let target = if index == 0 {
            current.parent().unwrap_or(current)
        } else {
            match current.children().into_iter().nth(index - 1) {
                Some(child) => child,
                None => return false,
            }
        };
        self.update_display(|d| d.hierarchy_node = Some(target));
        true
    }

    fn exec_list(&self, args: &[&str], out: &mut dyn OutputDevice) -> bool {
        match args.first().map(|a| a.to_ascii_lowercase()).as_deref() {
            Some("groups") => {
                for group in self.groups() {
                    let state = if group.is_visible() { "shown" } else { "hidden" };
                    out.log(&format!("{} ({})", group.name(), state));
                }
                true
            }
            Some("sets") => {
                for (name, stats) in &self.config().sets {
                    out.log(&format!("{name}: {} stats", stats.len()));
                }
                true
            }
            Some("group") => {
                let name = args.get(1..).unwrap_or_default().join(" ");
                let Some(group) = self.group_by_name(&name) else {
                    return false;
                };
                for node in group.canonical_stats() {
                    out.log(&format!("{} (cycle)", node.info().name()));
                }
                for stat in group.values() {
                    out.log(&format!("{} ({})", stat.info().name(), stat.kind().label()));
                }
                true
            }
            _ => false,
        }
    }

    fn exec_save(&self, args: &[&str], out: &mut dyn OutputDevice) -> bool {
        let set = args.join(" ");
        if set.is_empty() {
            return false;
        }
        let mut names = Vec::new();
        for group in self.groups().iter().filter(|g| g.is_visible()) {
            for node in group.canonical_stats() {
                if node.info().is_visible() {
                    names.push(node.info().name().to_owned());
                }
            }
            for stat in group.values() {
                if stat.info().is_visible() {
                    names.push(stat.info().name().to_owned());
                }
            }
        }
        let count = names.len();
        match self.update_config(|config| {
            config.sets.insert(set.clone(), names);
        }) {
            Ok(()) => {
                out.log(&format!("Saved {count} stats as '{set}'"));
                true
            }
            Err(e) => {
                out.log(&format!("Failed to save stat set '{set}': {e}"));
                false
            }
        }
    }

    fn toggle_group_or_set(&self, name: &str, out: &mut dyn OutputDevice) -> bool {
        if let Some(group) = self.group_by_name(name) {
            let id = group.group_id();
            let visible = !group.is_visible();
            self.set_group_visible(id, visible);
            return true;
        }

        let config = self.config();
        let Some((set, stat_names)) = config.find_set(name) else {
            out.log(&format!("Unknown stat command: {name}"));
            return false;
        };
        let (stats, groups) = self.resolve_set(stat_names);

        let mut active = self.active_set().lock();
        if active.as_deref() == Some(set) {
            for group in groups {
                self.set_group_visible(group, false);
            }
            *active = None;
            return true;
        }
        if let Some((_, previous)) = active.as_deref().and_then(|prev| config.find_set(prev)) {
            for group in self.resolve_set(previous).1 {
                self.set_group_visible(group, false);
            }
        }
        for &group in &groups {
            self.set_group_visible(group, true);
            if let Some(target) = self.group(group) {
                target.set_all_stats_visible(false);
            }
        }
        for stat in stats {
            self.set_stat_visibility(stat, true);
        }
        *active = Some(set.to_owned());
        true
    }

    /// Stats of a saved set that exist, and the groups they live in.
    fn resolve_set(&self, stat_names: &[String]) -> (Vec<StatId>, Vec<GroupId>) {
        let stats: Vec<StatId> = stat_names
            .iter()
            .filter_map(|name| self.stat_id_by_name(name))
            .collect();
        let mut groups: Vec<GroupId> = stats
            .iter()
            .filter_map(|&stat| self.factory(stat).map(|f| f.group_id()))
            .collect();
        groups.sort_unstable();
        groups.dedup();
        (stats, groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hud::{StatHud, TextCanvas};
    use crate::clock::ManualClock;
    use crate::config::StatsConfig;
    use crate::manager::tests::{manager, manager_with, HITS, INNER, OUTER, PACKETS, WORK};
    use crate::registry::Registry;
    use crate::scope::CycleCounter;
    use framestat_core::ThreadIndex;
    use std::sync::Arc;

    const WORKER_JOB: StatId = StatId(300);
    const JOBS_RUN: StatId = StatId(301);

    fn manager_with_spaced_names() -> StatManager {
        let mut registry = Registry::new();
        registry
            .declare_group("Render Thread", GroupId::SCENE_RENDERING)
            .and_then(|r| r.declare_cycle_stat("Worker Job", WORKER_JOB, GroupId::SCENE_RENDERING))
            .and_then(|r| r.declare_dword_counter("Jobs Run", JOBS_RUN, GroupId::SCENE_RENDERING))
            .unwrap();
        let mut config = StatsConfig::default();
        config
            .sets
            .insert("Just Jobs".to_owned(), vec!["Jobs Run".to_owned()]);
        StatManager::new(registry, config, Arc::new(ManualClock::new())).unwrap()
    }

    #[test]
    fn group_command_shows_group_and_its_stats() {
        let (manager, clock) = manager();
        manager.set_stat_visibility(WORK, false);
        {
            let _work = CycleCounter::new(&manager, WORK);
            clock.advance(10);
        }
        manager.advance_frame();
        let group = manager.group(GroupId::GAME).unwrap();
        assert!(!group.is_visible());

        let mut out = Vec::new();
        assert!(manager.exec("STAT GAME", &mut out));
        assert!(group.is_visible());
        assert!(manager.is_stat_visible(WORK));
        assert!(manager.is_stat_visible(HITS));

        let mut canvas = TextCanvas::new();
        StatHud::new().render(&manager, &mut canvas);
        assert!(canvas.contains("Game"));
        assert!(canvas.contains("Work"));

        assert!(manager.exec("stat game", &mut out));
        assert!(!group.is_visible());
    }

    #[test]
    fn unknown_commands_change_nothing() {
        let (manager, _clock) = manager();
        let mut out = Vec::new();
        let before = manager.display();
        assert!(!manager.exec("STAT NOSUCHTHING", &mut out));
        assert!(!manager.exec("STAT SLOW fast", &mut out));
        assert!(!manager.exec("STAT FONTSCALE -1", &mut out));
        assert!(!manager.exec("HELLO", &mut out));
        let after = manager.display();
        assert_eq!(before.mode, after.mode);
        assert_eq!(before.font_scale.to_bits(), after.font_scale.to_bits());
        assert_eq!(manager.rendered_group_count(), 0);
    }

    #[test]
    fn display_toggles_and_slow_arguments() {
        let (manager, _clock) = manager();
        let mut out = Vec::new();
        assert!(manager.exec("STAT EXCLUSIVE", &mut out));
        assert!(manager.display().show_exclusive);
        assert!(manager.exec("STAT SLOW 0.5 3", &mut out));
        let display = manager.display();
        assert_eq!(display.mode, RenderMode::Slow);
        assert!((display.slow_threshold_secs - 0.5).abs() < f32::EPSILON);
        assert!((display.min_slow_duration_secs - 3.0).abs() < f32::EPSILON);
        assert!(manager.scopes_enabled());
        assert!(manager.exec("STAT GROUPED", &mut out));
        assert!(!manager.scopes_enabled());
        assert!(manager.exec("STAT FONTSCALE 1.5", &mut out));
        assert!((manager.display().font_scale - 1.5).abs() < f32::EPSILON);
    }

    #[test]
    fn navigation_walks_the_tree() {
        let (manager, clock) = manager();
        {
            let _outer = CycleCounter::new(&manager, OUTER);
            let _inner = CycleCounter::new(&manager, INNER);
            clock.advance(1);
        }
        let mut out = Vec::new();
        assert!(!manager.exec("STAT NAV 1", &mut out));
        assert!(manager.exec("STAT HIER", &mut out));
        assert!(manager.exec("STAT NAV 1", &mut out));
        assert!(manager.exec("STAT NAV 1", &mut out));
        let node = manager.display().hierarchy_node.unwrap();
        assert_eq!(node.stat_id(), INNER);
        assert_eq!(node.thread(), ThreadIndex::current());
        assert!(!manager.exec("STAT NAV 5", &mut out));
        assert!(manager.exec("STAT NAV 0", &mut out));
        assert_eq!(manager.display().hierarchy_node.unwrap().stat_id(), OUTER);
        assert!(manager.exec("STAT HIERARCHY", &mut out));
        assert_eq!(manager.display().mode, RenderMode::Grouped);
    }

    #[test]
    fn list_reports_groups_and_kinds() {
        let (manager, _clock) = manager();
        let mut out = Vec::new();
        assert!(manager.exec("STAT LIST GROUP game", &mut out));
        assert!(out.contains(&"Work (cycle)".to_owned()));
        assert!(out.contains(&"Hits (dword counter)".to_owned()));
        out.clear();
        assert!(manager.exec("STAT LIST GROUPS", &mut out));
        assert!(out.iter().any(|l| l == "Game (hidden)"));
        assert!(!manager.exec("STAT LIST GROUP nope", &mut out));
    }

    #[test]
    fn saved_sets_toggle_and_persist() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(crate::config::CONFIG_FILE_NAME);
        let (manager, _clock) = manager();
        let manager = manager.with_config_path(&path);
        let mut out = Vec::new();

        assert!(manager.exec("STAT NAME Hits", &mut out));
        assert!(!manager.is_stat_visible(HITS));
        assert!(manager.exec("STAT GAME", &mut out));
        manager.set_stat_visibility(HITS, false);
        assert!(manager.exec("STAT SAVE Mine", &mut out));

        let saved = crate::config::StatsConfig::load_from_path(&path).unwrap();
        let names = &saved.sets["Mine"];
        assert!(names.contains(&"Work".to_owned()));
        assert!(!names.contains(&"Hits".to_owned()));

        assert!(manager.exec("STAT NONE", &mut out));
        assert_eq!(manager.rendered_group_count(), 0);
        assert!(manager.exec("STAT mine", &mut out));
        assert!(manager.group(GroupId::GAME).unwrap().is_visible());
        assert!(manager.is_stat_visible(WORK));
        assert!(!manager.is_stat_visible(HITS));
        assert!(manager.exec("STAT MINE", &mut out));
        assert!(!manager.group(GroupId::GAME).unwrap().is_visible());
    }

    #[test]
    fn capture_commands() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cmd.fstats");
        let (manager, _clock) = manager();
        let mut out = Vec::new();
        assert!(!manager.exec("STAT STOPFILE", &mut out));
        assert!(manager.exec(&format!("STAT STARTFILE {}", path.display()), &mut out));
        manager.advance_frame();
        assert!(manager.exec("STAT STOPFILE", &mut out));
        assert_eq!(crate::sink::CaptureReader::open(&path).unwrap().frames.len(), 1);
    }

    #[test]
    fn names_with_spaces_address_stats_groups_and_sets() {
        let manager = manager_with_spaced_names();
        let mut out = Vec::new();

        assert!(manager.is_stat_visible(WORKER_JOB));
        assert!(manager.exec("STAT NAME Worker Job", &mut out));
        assert!(!manager.is_stat_visible(WORKER_JOB));
        assert!(manager.exec("stat name  worker   JOB", &mut out));
        assert!(manager.is_stat_visible(WORKER_JOB));
        assert!(out.is_empty());

        let group = manager.group(GroupId::SCENE_RENDERING).unwrap();
        assert!(manager.exec("STAT Render Thread", &mut out));
        assert!(group.is_visible());
        assert!(manager.exec("STAT render thread", &mut out));
        assert!(!group.is_visible());

        assert!(manager.exec("STAT Just Jobs", &mut out));
        assert!(group.is_visible());
        assert!(manager.is_stat_visible(JOBS_RUN));
        assert!(!manager.is_stat_visible(WORKER_JOB));

        assert!(manager.exec("STAT LIST GROUP Render Thread", &mut out));
        assert!(out.contains(&"Worker Job (cycle)".to_owned()));

        assert!(manager.exec("STAT SAVE Night Shift", &mut out));
        assert_eq!(
            manager.config().sets["Night Shift"],
            vec!["Jobs Run".to_owned()]
        );
        assert!(!manager.exec("STAT NAME", &mut out));
    }

    #[test]
    fn switching_sets_hides_the_previous_sets_groups() {
        let mut config = StatsConfig::default();
        config.sets.insert("Gameplay".to_owned(), vec!["Work".to_owned()]);
        config.sets.insert("Network".to_owned(), vec!["Packets".to_owned()]);
        let (manager, _clock) = manager_with(config);
        let game = manager.group(GroupId::GAME).unwrap();
        let net = manager.group(GroupId::NET).unwrap();
        let mut out = Vec::new();

        assert!(manager.exec("STAT GAMEPLAY", &mut out));
        assert!(game.is_visible());
        assert!(!net.is_visible());

        assert!(manager.exec("STAT NETWORK", &mut out));
        assert!(!game.is_visible());
        assert!(net.is_visible());
        assert!(manager.is_stat_visible(PACKETS));
        assert_eq!(manager.rendered_group_count(), 1);

        assert!(manager.exec("STAT NETWORK", &mut out));
        assert_eq!(manager.rendered_group_count(), 0);
    }
}
