//! Instrumentation macros over the global manager.
//!
//! With the `stats` feature disabled every macro expands to nothing. With it
//! enabled they are no-ops until [`crate::init`] has run.

/// Time the rest of the enclosing scope under a cycle stat.
///
/// ```ignore
/// fn tick_world() {
///     framestat::scope_cycle_counter!(STAT_WORLD_TICK);
///     // ...
/// }
/// ```
#[cfg(feature = "stats")]
#[macro_export]
macro_rules! scope_cycle_counter {
    ($stat:expr) => {
        let _framestat_scope = $crate::global().map(|manager| $crate::CycleCounter::new(manager, $stat));
    };
}

#[cfg(not(feature = "stats"))]
#[macro_export]
macro_rules! scope_cycle_counter {
    ($stat:expr) => {};
}

/// Like [`scope_cycle_counter!`], but only while something consumes cycle
/// stats: a visible group, a non-grouped HUD mode, a listening sink or
/// forced enabling.
#[cfg(feature = "stats")]
#[macro_export]
macro_rules! conditional_scope_cycle_counter {
    ($stat:expr) => {
        let _framestat_scope =
            $crate::global().map(|manager| $crate::ScopeCycleCounter::new(manager, $stat));
    };
}

#[cfg(not(feature = "stats"))]
#[macro_export]
macro_rules! conditional_scope_cycle_counter {
    ($stat:expr) => {};
}

/// Overwrite this frame's totals of a cycle stat.
#[cfg(feature = "stats")]
#[macro_export]
macro_rules! set_cycle_counter {
    ($stat:expr, $cycles:expr, $calls:expr) => {
        if let Some(manager) = $crate::global() {
            manager.set_cycle_counter($stat, $cycles, $calls);
        }
    };
}

#[cfg(not(feature = "stats"))]
#[macro_export]
macro_rules! set_cycle_counter {
    ($stat:expr, $cycles:expr, $calls:expr) => {};
}

/// Add to an integer stat (counter, accumulator or memory gauge).
#[cfg(feature = "stats")]
#[macro_export]
macro_rules! inc_dword_stat {
    ($stat:expr) => {
        $crate::inc_dword_stat!($stat, 1)
    };
    ($stat:expr, $amount:expr) => {
        if let Some(manager) = $crate::global() {
            manager.increment_dword($stat, $amount);
        }
    };
}

#[cfg(not(feature = "stats"))]
#[macro_export]
macro_rules! inc_dword_stat {
    ($stat:expr) => {};
    ($stat:expr, $amount:expr) => {};
}

/// Subtract from an integer stat.
#[cfg(feature = "stats")]
#[macro_export]
macro_rules! dec_dword_stat {
    ($stat:expr) => {
        $crate::dec_dword_stat!($stat, 1)
    };
    ($stat:expr, $amount:expr) => {
        if let Some(manager) = $crate::global() {
            manager.decrement_dword($stat, $amount);
        }
    };
}

#[cfg(not(feature = "stats"))]
#[macro_export]
macro_rules! dec_dword_stat {
    ($stat:expr) => {};
    ($stat:expr, $amount:expr) => {};
}

/// Overwrite an integer stat.
#[cfg(feature = "stats")]
#[macro_export]
macro_rules! set_dword_stat {
    ($stat:expr, $value:expr) => {
        if let Some(manager) = $crate::global() {
            manager.set_dword($stat, $value);
        }
    };
}

#[cfg(not(feature = "stats"))]
#[macro_export]
macro_rules! set_dword_stat {
    ($stat:expr, $value:expr) => {};
}

/// Add to a float stat.
#[cfg(feature = "stats")]
#[macro_export]
macro_rules! inc_float_stat {
    ($stat:expr, $amount:expr) => {
        if let Some(manager) = $crate::global() {
            manager.increment_float($stat, $amount);
        }
    };
}

#[cfg(not(feature = "stats"))]
#[macro_export]
macro_rules! inc_float_stat {
    ($stat:expr, $amount:expr) => {};
}

/// Subtract from a float stat.
#[cfg(feature = "stats")]
#[macro_export]
macro_rules! dec_float_stat {
    ($stat:expr, $amount:expr) => {
        if let Some(manager) = $crate::global() {
            manager.decrement_float($stat, $amount);
        }
    };
}

#[cfg(not(feature = "stats"))]
#[macro_export]
macro_rules! dec_float_stat {
    ($stat:expr, $amount:expr) => {};
}

/// Overwrite a float stat.
#[cfg(feature = "stats")]
#[macro_export]
macro_rules! set_float_stat {
    ($stat:expr, $value:expr) => {
        if let Some(manager) = $crate::global() {
            manager.set_float($stat, $value);
        }
    };
}

#[cfg(not(feature = "stats"))]
#[macro_export]
macro_rules! set_float_stat {
    ($stat:expr, $value:expr) => {};
}

/// Memory gauges are integer stats; these read better at allocation sites.
#[macro_export]
macro_rules! inc_memory_stat {
    ($stat:expr, $bytes:expr) => {
        $crate::inc_dword_stat!($stat, $bytes)
    };
}

/// See [`inc_memory_stat!`].
#[macro_export]
macro_rules! dec_memory_stat {
    ($stat:expr, $bytes:expr) => {
        $crate::dec_dword_stat!($stat, $bytes)
    };
}

/// See [`inc_memory_stat!`].
#[macro_export]
macro_rules! set_memory_stat {
    ($stat:expr, $bytes:expr) => {
        $crate::set_dword_stat!($stat, $bytes)
    };
}

#[cfg(test)]
mod tests {
    use framestat_core::StatId;

    #[test]
    fn macros_expand_in_statement_position() {
        const STAT: StatId = StatId(390);
        {
            crate::scope_cycle_counter!(STAT);
            crate::conditional_scope_cycle_counter!(STAT);
            crate::inc_dword_stat!(STAT);
            crate::inc_dword_stat!(STAT, 2);
            crate::dec_dword_stat!(STAT);
            crate::set_dword_stat!(STAT, 3);
            crate::inc_float_stat!(STAT, 1.0);
            crate::dec_float_stat!(STAT, 1.0);
            crate::set_float_stat!(STAT, 1.0);
            crate::inc_memory_stat!(STAT, 64);
            crate::dec_memory_stat!(STAT, 64);
            crate::set_memory_stat!(STAT, 64);
            crate::set_cycle_counter!(STAT, 10, 1);
        }
    }
}
