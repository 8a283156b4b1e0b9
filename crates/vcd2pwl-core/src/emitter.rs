//! PWL emitter
//!
//! Turns finalized timelines into breakpoint sequences. Every transition at
//! time `t` becomes two breakpoints, `(t - ε, old)` and `(t, new)`, so the
//! analog simulator always sees a finite slope.

use crate::config::{BusMode, ConvertConfig, FloatingPolicy, UndefinedPolicy};
use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::header::{DeclarationTable, SignalDeclaration};
use crate::timeline::{SignalTimeline, Timelines};
use crate::types::{Logic, Result, Timescale, VarType};
use rayon::prelude::*;
use tracing::{debug, info, instrument};

// ============================================================================
// Output types
// ============================================================================

/// One `(time, voltage)` point, time in femtoseconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breakpoint {
    pub time: u64,
    pub voltage: f64,
}

/// Breakpoints of one emitted source
#[derive(Debug, Clone, PartialEq)]
pub struct PwlWaveform {
    /// Fully-qualified name, with `[bit]` for split vectors
    pub name: String,
    /// Leaf name used as the SPICE node, with `[bit]` for split vectors
    pub node: String,
    /// Slot in the declaration table
    pub signal: usize,
    /// Bit index (LSB = 0) when split from a vector
    pub bit: Option<usize>,
    pub breakpoints: Vec<Breakpoint>,
}

impl PwlWaveform {
    pub fn start_time(&self) -> u64 {
        self.breakpoints.first().map(|b| b.time).unwrap_or(0)
    }

    pub fn end_time(&self) -> u64 {
        self.breakpoints.last().map(|b| b.time).unwrap_or(0)
    }
}

// ============================================================================
// Level mapping
// ============================================================================

/// Logic level to voltage mapping
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelMap {
    pub low: f64,
    pub high: f64,
    pub undefined: UndefinedPolicy,
    pub floating: FloatingPolicy,
}

impl LevelMap {
    pub fn from_config(config: &ConvertConfig) -> Self {
        Self {
            low: config.low_voltage,
            high: config.high_voltage,
            undefined: config.undefined,
            floating: config.floating,
        }
    }

    #[inline]
    fn midpoint(&self) -> f64 {
        (self.low + self.high) / 2.0
    }

    /// Voltage of `level`. Hold policies reuse `previous`, or the low rail
    /// when there is nothing to hold yet.
    pub fn voltage(&self, level: Logic, previous: Option<f64>) -> f64 {
        match level {
            Logic::Zero => self.low,
            Logic::One => self.high,
            Logic::Undefined => match self.undefined {
                UndefinedPolicy::Midpoint | UndefinedPolicy::Skip => self.midpoint(),
                UndefinedPolicy::Hold => previous.unwrap_or(self.low),
                UndefinedPolicy::Low => self.low,
                UndefinedPolicy::High => self.high,
            },
            Logic::Floating => match self.floating {
                FloatingPolicy::Hold => previous.unwrap_or(self.low),
                FloatingPolicy::Midpoint => self.midpoint(),
                FloatingPolicy::Low => self.low,
                FloatingPolicy::High => self.high,
            },
        }
    }

    /// Voltage of a whole vector on an evenly spaced ladder between the rails.
    ///
    /// All-`Z` maps as floating, any other `X`/`Z` bit as undefined. Only the
    /// 64 most significant bits take part in the quantization.
    pub fn ladder_voltage(&self, bits: &[Logic], previous: Option<f64>) -> f64 {
        if bits.iter().all(|&b| b == Logic::Floating) {
            return self.voltage(Logic::Floating, previous);
        }
        if bits
            .iter()
            .any(|&b| matches!(b, Logic::Undefined | Logic::Floating))
        {
            return self.voltage(Logic::Undefined, previous);
        }

        let significant = &bits[..bits.len().min(64)];
        let value = significant
            .iter()
            .fold(0u64, |acc, &b| (acc << 1) | (b == Logic::One) as u64);
        let max = if significant.len() == 64 {
            u64::MAX
        } else {
            (1u64 << significant.len()) - 1
        };
        self.low + (self.high - self.low) * (value as f64 / max as f64)
    }
}

// ============================================================================
// Breakpoint construction
// ============================================================================

/// Counters of approximations made while shaping one waveform
#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct ShapeStats {
    shrunk: usize,
    instant: usize,
    first_shrunk_at: Option<u64>,
}

/// Build breakpoints from distinct-voltage points starting at time 0.
///
/// `points` are `(femtoseconds, voltage)` with strictly increasing times.
fn shape(points: &[(u64, f64)], end: u64, epsilon: u64) -> (Vec<Breakpoint>, ShapeStats) {
    let mut out: Vec<Breakpoint> = Vec::with_capacity(points.len() * 2 + 1);
    let mut stats = ShapeStats::default();

    for &(time, voltage) in points {
        if let Some(&prev) = out.last() {
            let gap = time - prev.time;
            let mut eps = epsilon;
            if eps >= gap {
                eps = gap / 2;
                stats.shrunk += 1;
                stats.first_shrunk_at.get_or_insert(time);
            }
            if eps == 0 {
                stats.instant += 1;
            } else {
                out.push(Breakpoint {
                    time: time - eps,
                    voltage: prev.voltage,
                });
            }
        }
        out.push(Breakpoint { time, voltage });
    }

    if let Some(&last) = out.last() {
        if end > last.time {
            out.push(Breakpoint {
                time: end,
                voltage: last.voltage,
            });
        }
    }

    (out, stats)
}

/// Shared, read-only inputs of every emission job
struct EmitContext<'c> {
    config: &'c ConvertConfig,
    map: LevelMap,
    femtos_per_tick: u64,
    end: u64,
}

impl EmitContext<'_> {
    /// Map a timeline to distinct-voltage points in femtoseconds.
    /// Returns the points and how many level changes produced no voltage change.
    fn points<F>(&self, timeline: &SignalTimeline, mut level: F) -> (Vec<(u64, f64)>, usize)
    where
        F: FnMut(&[Logic], Option<f64>) -> f64,
    {
        let mut points = Vec::with_capacity(timeline.len());
        let mut merged = 0;
        let mut previous: Option<f64> = None;
        for (tick, value) in timeline.iter() {
            let voltage = level(value, previous);
            if previous == Some(voltage) {
                merged += 1;
                continue;
            }
            // Every tick is <= the end time, whose conversion was already checked
            points.push((tick * self.femtos_per_tick, voltage));
            previous = Some(voltage);
        }
        (points, merged)
    }

    fn waveform(
        &self,
        decl: &SignalDeclaration,
        signal: usize,
        bit: Option<usize>,
        points: &[(u64, f64)],
        diags: &mut Diagnostics,
    ) -> PwlWaveform {
        let (name, node) = match bit {
            Some(b) => (
                format!("{}[{}]", decl.name, b),
                format!("{}[{}]", decl.reference, b),
            ),
            None => (decl.name.clone(), decl.reference.clone()),
        };

        let epsilon = self.config.transition_for(&decl.reference).femtos();
        let (breakpoints, stats) = shape(points, self.end, epsilon);

        if stats.shrunk > 0 {
            diags.info(
                DiagnosticKind::EpsilonShrunk,
                format!(
                    "{}: transition time shrunk on {} transition(s), first at {}fs",
                    name,
                    stats.shrunk,
                    stats.first_shrunk_at.unwrap_or(0)
                ),
            );
        }
        if stats.instant > 0 {
            diags.info(
                DiagnosticKind::InstantTransition,
                format!("{}: {} transition(s) left without ramp", name, stats.instant),
            );
        }

        PwlWaveform {
            name,
            node,
            signal,
            bit,
            breakpoints,
        }
    }

    /// Every waveform of one signal, with the diagnostics they produced
    fn emit_signal(
        &self,
        decl: &SignalDeclaration,
        signal: usize,
        timeline: &SignalTimeline,
    ) -> (Vec<PwlWaveform>, Diagnostics) {
        let mut diags = Diagnostics::new();

        if decl.var_type == VarType::Real {
            diags.info(
                DiagnosticKind::SignalSkipped,
                format!("{}: real variable has no logic levels, skipped", decl.name),
            );
            return (Vec::new(), diags);
        }

        // The implicit X at time 0 is not a value the trace carried
        if self.map.undefined == UndefinedPolicy::Skip && timeline.observed_undefined() {
            diags.info(
                DiagnosticKind::SignalSkipped,
                format!("{}: carries X, skipped", decl.name),
            );
            return (Vec::new(), diags);
        }

        if timeline.collapsed() > 0 {
            diags.info(
                DiagnosticKind::RunCollapsed,
                format!("{}: {} repeated value(s) collapsed", decl.name, timeline.collapsed()),
            );
        }

        let mut waveforms = Vec::new();
        let mut merged = 0;

        if decl.width == 1 {
            let (points, m) = self.points(timeline, |v, prev| self.map.voltage(v[0], prev));
            merged += m;
            waveforms.push(self.waveform(decl, signal, None, &points, &mut diags));
        } else {
            match self.config.bus {
                BusMode::Split => {
                    // MSB first, like the declared range
                    for bit in (0..decl.width).rev() {
                        let projected = timeline.bit(bit);
                        let (points, m) =
                            self.points(&projected, |v, prev| self.map.voltage(v[0], prev));
                        merged += m;
                        waveforms.push(self.waveform(decl, signal, Some(bit), &points, &mut diags));
                    }
                }
                BusMode::Ladder => {
                    let (points, m) =
                        self.points(timeline, |v, prev| self.map.ladder_voltage(v, prev));
                    merged += m;
                    waveforms.push(self.waveform(decl, signal, None, &points, &mut diags));
                }
            }
        }

        if merged > 0 {
            diags.info(
                DiagnosticKind::RunCollapsed,
                format!("{}: {} level change(s) mapped to an unchanged voltage", decl.name, merged),
            );
        }

        (waveforms, diags)
    }
}

// ============================================================================
// Public entry point
// ============================================================================

/// Emit breakpoint sequences for every exported signal, in declaration order.
#[instrument(skip_all, fields(signals = table.len(), parallel = config.parallel))]
pub fn emit(
    table: &DeclarationTable,
    timelines: &Timelines,
    timescale: Timescale,
    config: &ConvertConfig,
    diags: &mut Diagnostics,
) -> Result<Vec<PwlWaveform>> {
    let end = match timescale.ticks_to_femtos(timelines.end_time()) {
        Some(end) => end,
        None => {
            return Err(diags.fatal(
                DiagnosticKind::TimeOverflow,
                format!(
                    "end time #{} at {} exceeds the femtosecond range",
                    timelines.end_time(),
                    timescale
                ),
                None,
            ))
        }
    };

    let ctx = EmitContext {
        config,
        map: LevelMap::from_config(config),
        femtos_per_tick: timescale.femtos_per_tick(),
        end,
    };

    let selected: Vec<usize> = (0..table.len())
        .filter(|&i| {
            let keep = config.exports(&table.get(i).name);
            if !keep {
                debug!(signal = %table.get(i).name, "Outside exported scopes");
            }
            keep
        })
        .collect();

    let job = |&i: &usize| ctx.emit_signal(table.get(i), i, timelines.get(i));
    let results: Vec<(Vec<PwlWaveform>, Diagnostics)> = if config.parallel {
        selected.par_iter().map(job).collect()
    } else {
        selected.iter().map(job).collect()
    };

    let mut waveforms = Vec::new();
    for (signal_waveforms, signal_diags) in results {
        waveforms.extend(signal_waveforms);
        diags.extend(signal_diags);
    }

    info!(waveforms = waveforms.len(), end_fs = end, "Waveforms emitted");
    Ok(waveforms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeValue;
    use Logic::*;

    fn map() -> LevelMap {
        LevelMap::from_config(&ConvertConfig::default())
    }

    fn bp(time: u64, voltage: f64) -> Breakpoint {
        Breakpoint { time, voltage }
    }

    #[test]
    fn test_shape_inserts_epsilon() {
        let (out, stats) = shape(&[(0, 0.0), (5_000, 1.8), (10_000, 0.0)], 10_000, 100);
        assert_eq!(
            out,
            vec![
                bp(0, 0.0),
                bp(4_900, 0.0),
                bp(5_000, 1.8),
                bp(9_900, 1.8),
                bp(10_000, 0.0)
            ]
        );
        assert_eq!(stats.shrunk, 0);
    }

    #[test]
    fn test_shape_shrinks_epsilon() {
        let (out, stats) = shape(&[(0, 0.0), (40, 1.8)], 100, 100);
        assert_eq!(out, vec![bp(0, 0.0), bp(20, 0.0), bp(40, 1.8), bp(100, 1.8)]);
        assert_eq!(stats.shrunk, 1);
        assert_eq!(stats.first_shrunk_at, Some(40));
    }

    #[test]
    fn test_shape_instant_when_gap_is_one() {
        let (out, stats) = shape(&[(0, 0.0), (1, 1.8)], 1, 100);
        assert_eq!(out, vec![bp(0, 0.0), bp(1, 1.8)]);
        assert_eq!(stats.instant, 1);
    }

    #[test]
    fn test_shape_holds_to_end() {
        let (out, _) = shape(&[(0, 0.9)], 7_000, 10);
        assert_eq!(out, vec![bp(0, 0.9), bp(7_000, 0.9)]);
    }

    #[test]
    fn test_level_policies() {
        let m = map();
        assert_eq!(m.voltage(Zero, None), 0.0);
        assert_eq!(m.voltage(One, None), 1.8);
        assert_eq!(m.voltage(Undefined, None), 0.9);
        assert_eq!(m.voltage(Floating, Some(1.8)), 1.8);
        assert_eq!(m.voltage(Floating, None), 0.0);

        let hold_x = LevelMap {
            undefined: UndefinedPolicy::Hold,
            ..m
        };
        assert_eq!(hold_x.voltage(Undefined, Some(1.8)), 1.8);
    }

    #[test]
    fn test_ladder_voltage() {
        let m = map();
        assert_eq!(m.ladder_voltage(&[Zero, Zero], None), 0.0);
        assert_eq!(m.ladder_voltage(&[One, One], None), 1.8);
        assert!((m.ladder_voltage(&[Zero, One], None) - 0.6).abs() < 1e-12);
        assert_eq!(m.ladder_voltage(&[One, Undefined], None), 0.9);
        assert_eq!(m.ladder_voltage(&[Floating, Floating], Some(1.2)), 1.2);
    }

    fn single(width: usize, changes: &[(u64, &[Logic])]) -> (DeclarationTable, Timelines) {
        use crate::header::parse_header;
        use crate::scanner::Scanner;
        use crate::timeline::TimelineBuilder;

        let text = format!(
            "$timescale 1ns $end $scope module top $end $var wire {} ! clk $end $upscope $end $enddefinitions $end",
            width
        );
        let mut scanner = Scanner::new(text.as_bytes());
        let mut diags = Diagnostics::new();
        let header = parse_header(&mut scanner, &mut diags).unwrap();
        let mut builder = TimelineBuilder::new(&header.table, Undefined);
        let mut end = 0;
        for &(time, value) in changes {
            builder.apply(crate::decoder::ValueChange {
                time,
                signal: 0,
                value,
            });
            end = time;
        }
        (header.table, builder.finish(end))
    }

    fn ns() -> Timescale {
        "1ns".parse().unwrap()
    }

    #[test]
    fn test_emit_clock_scenario() {
        let (table, timelines) = single(1, &[(0, &[Zero]), (5, &[One]), (10, &[Zero])]);
        let config = ConvertConfig {
            transition: TimeValue::from_picos(100),
            ..Default::default()
        };
        let mut diags = Diagnostics::new();
        let waves = emit(&table, &timelines, ns(), &config, &mut diags).unwrap();
        assert_eq!(waves.len(), 1);
        assert_eq!(waves[0].name, "top.clk");
        assert_eq!(
            waves[0].breakpoints,
            vec![
                bp(0, 0.0),
                bp(4_900_000, 0.0),
                bp(5_000_000, 1.8),
                bp(9_900_000, 1.8),
                bp(10_000_000, 0.0),
            ]
        );
    }

    #[test]
    fn test_emit_split_bits() {
        let (table, timelines) = single(2, &[(0, &[Zero, Zero]), (4, &[One, Zero]), (8, &[One, One])]);
        let mut diags = Diagnostics::new();
        let waves = emit(&table, &timelines, ns(), &ConvertConfig::default(), &mut diags).unwrap();
        let names: Vec<_> = waves.iter().map(|w| w.node.as_str()).collect();
        assert_eq!(names, vec!["clk[1]", "clk[0]"]);
        assert_eq!(waves[0].bit, Some(1));
        // Both bits end at the trace end time
        assert!(waves.iter().all(|w| w.end_time() == 8_000_000));
        assert_eq!(waves[1].breakpoints.len(), 3);
    }

    #[test]
    fn test_emit_skip_x_signal() {
        let (table, timelines) = single(1, &[(0, &[Undefined]), (3, &[One])]);
        let config = ConvertConfig {
            undefined: UndefinedPolicy::Skip,
            ..Default::default()
        };
        let mut diags = Diagnostics::new();
        let waves = emit(&table, &timelines, ns(), &config, &mut diags).unwrap();
        assert!(waves.is_empty());
        assert_eq!(diags.count(DiagnosticKind::SignalSkipped), 1);
    }

    #[test]
    fn test_emit_skip_keeps_signal_without_dump() {
        // No value at #0, so only the implicit initial X is present
        let (table, timelines) = single(1, &[(3, &[One])]);
        let config = ConvertConfig {
            undefined: UndefinedPolicy::Skip,
            ..Default::default()
        };
        let mut diags = Diagnostics::new();
        let waves = emit(&table, &timelines, ns(), &config, &mut diags).unwrap();
        assert_eq!(waves.len(), 1);
        assert_eq!(waves[0].end_time(), 3_000_000);
        assert_eq!(diags.count(DiagnosticKind::SignalSkipped), 0);
    }

    #[test]
    fn test_emit_skips_real_variables() {
        let data = b"$timescale 1ns $end $var real 64 ! vref $end $var wire 1 \" en $end \
                     $enddefinitions $end #0 r1.25 ! 1\" #4 r0.5 !";
        let mut diags = Diagnostics::new();
        let trace = crate::driver::parse_bytes(data, &mut diags).unwrap();
        let waves = emit(
            &trace.header.table,
            &trace.timelines,
            trace.header.timescale,
            &ConvertConfig::default(),
            &mut diags,
        )
        .unwrap();
        let names: Vec<_> = waves.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["en"]);
        assert_eq!(diags.count(DiagnosticKind::SignalSkipped), 1);
    }

    #[test]
    fn test_emit_end_time_overflow_is_fatal() {
        let (table, timelines) = single(1, &[(0, &[Zero]), (200, &[One])]);
        let mut diags = Diagnostics::new();
        let hundred_seconds: Timescale = "100 s".parse().unwrap();
        let result = emit(&table, &timelines, hundred_seconds, &ConvertConfig::default(), &mut diags);
        assert!(result.is_err());
        assert_eq!(diags.count(DiagnosticKind::TimeOverflow), 1);
        assert_eq!(diags.exit_code(), 1);
    }

    #[test]
    fn test_emit_floating_hold_collapses() {
        let (table, timelines) = single(1, &[(0, &[One]), (2, &[Floating]), (4, &[One])]);
        let mut diags = Diagnostics::new();
        let waves = emit(&table, &timelines, ns(), &ConvertConfig::default(), &mut diags).unwrap();
        // Z holds 1.8V, so no voltage ever changes
        assert_eq!(waves[0].breakpoints, vec![bp(0, 1.8), bp(4_000_000, 1.8)]);
        assert_eq!(diags.count(DiagnosticKind::RunCollapsed), 1);
    }

    #[test]
    fn test_emit_parallel_matches_sequential() {
        let (table, timelines) = single(3, &[(0, &[Zero, One, Zero]), (6, &[One, One, Undefined])]);
        let parallel = ConvertConfig {
            parallel: true,
            ..Default::default()
        };
        let mut d1 = Diagnostics::new();
        let mut d2 = Diagnostics::new();
        let a = emit(&table, &timelines, ns(), &ConvertConfig::default(), &mut d1).unwrap();
        let b = emit(&table, &timelines, ns(), &parallel, &mut d2).unwrap();
        assert_eq!(a, b);
        assert_eq!(d1.len(), d2.len());
    }
}
