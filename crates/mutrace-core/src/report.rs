//! The exit-time summary.
//!
//! The report is produced at most once per [`Reporter`], whichever shutdown
//! path reaches it first. Producing it locks every shard in ascending order,
//! numbers the records, prints the first-use traces of the records that pass
//! the display thresholds, then prints them again as a ranked table. The
//! registry is sealed while the shards are held, so nothing changes after.

use facet::Facet;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::io::{self, Write};

use crate::config::ShowThresholds;
use crate::record::{MutexRecord, MutexStats};
use crate::registry::Registry;
use crate::stats::CounterSnapshot;

const NSEC_PER_MSEC: f64 = 1_000_000.0;

/// Machine-readable form of a report, in ranked order.
#[derive(Facet, Clone, Debug, PartialEq)]
pub struct ReportDocument {
    pub hash_size: u64,
    pub mutexes_used: u64,
    pub counters: CounterSnapshot,
    pub mutexes: Vec<ReportEntry>,
}

#[derive(Facet, Clone, Debug, PartialEq)]
pub struct ReportEntry {
    /// Passed the display thresholds and appears in the text report.
    pub shown: bool,
    pub stats: MutexStats,
}

impl ReportDocument {
    pub fn to_json(&self) -> Result<String, String> {
        facet_json::to_string(self).map_err(|e| format!("failed to encode report as JSON: {e}"))
    }
}

/// One-shot gate in front of [`write_report`].
#[derive(Debug, Default)]
pub struct Reporter {
    done: Mutex<bool>,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        *self.done.lock()
    }

    /// Write the report unless some earlier call already did. Returns the
    /// document on the call that produced it.
    pub fn report_once(
        &self,
        registry: &Registry,
        thresholds: &ShowThresholds,
        out: &mut dyn Write,
    ) -> io::Result<Option<ReportDocument>> {
        let mut done = self.done.lock();
        if *done {
            tracing::debug!("report already produced, skipping");
            return Ok(None);
        }
        *done = true;
        write_report(registry, thresholds, out).map(Some)
    }
}

pub fn is_shown(record: &MutexRecord, thresholds: &ShowThresholds) -> bool {
    record.locked_count >= thresholds.locked_min
        && record.owner_changed_count >= thresholds.owner_changed_min
        && record.contended_count >= thresholds.contended_min
}

/// Most contended first. Every key descends, ending with the address and the
/// report id so identical inputs always print identically.
pub fn report_order(a: &MutexRecord, b: &MutexRecord) -> Ordering {
    b.contended_count
        .cmp(&a.contended_count)
        .then_with(|| b.owner_changed_count.cmp(&a.owner_changed_count))
        .then_with(|| b.locked_count.cmp(&a.locked_count))
        .then_with(|| b.held_time_max.cmp(&a.held_time_max))
        .then_with(|| b.identity.cmp(&a.identity))
        .then_with(|| b.report_id.cmp(&a.report_id))
}

fn write_warnings(
    counters: &CounterSnapshot,
    hash_size: usize,
    out: &mut dyn Write,
) -> io::Result<()> {
    if counters.inconsistent > 0 {
        write!(
            out,
            "\n\
             mutrace: WARNING: {} inconsistent mutex uses detected. Results might not be reliable.\n\
             mutrace:          Fix your program first!\n",
            counters.inconsistent
        )?;
    }

    if counters.collisions > 0 {
        write!(
            out,
            "\n\
             mutrace: WARNING: {} internal hash collisions detected. Results might not be as reliable as they could be.\n\
             mutrace:          Try to increase MUTRACE_HASH_SIZE, which is currently at {}.\n",
            counters.collisions, hash_size
        )?;
    }

    if counters.self_contended > 0 {
        write!(
            out,
            "\n\
             mutrace: WARNING: {} internal mutex contention detected. Results might not be reliable as they could be.\n\
             mutrace:          Try to increase MUTRACE_HASH_SIZE, which is currently at {}.\n",
            counters.self_contended, hash_size
        )?;
    }

    Ok(())
}

fn write_row(record: &MutexRecord, id: u32, out: &mut dyn Write) -> io::Result<()> {
    let total_ms = record.held_time_total as f64 / NSEC_PER_MSEC;
    let avg_ms = if record.locked_count == 0 {
        0.0
    } else {
        total_ms / record.locked_count as f64
    };
    let max_ms = record.held_time_max as f64 / NSEC_PER_MSEC;

    writeln!(
        out,
        "{:8} {:8} {:8} {:8} {:12.3} {:12.3} {:12.3}{}",
        id,
        record.locked_count,
        record.owner_changed_count,
        record.contended_count,
        total_ms,
        avg_ms,
        max_ms,
        if record.is_broken {
            " inconsistent!"
        } else {
            ""
        }
    )
}

/// Produce the report unconditionally. Prefer [`Reporter::report_once`].
pub fn write_report(
    registry: &Registry,
    thresholds: &ShowThresholds,
    out: &mut dyn Write,
) -> io::Result<ReportDocument> {
    let hash_size = registry.hash_size();
    let counters = registry.counters().snapshot();
    write_warnings(&counters, hash_size, out)?;

    let mut locked = registry.lock_all();
    locked.seal();

    let mut document = ReportDocument {
        hash_size: hash_size as u64,
        mutexes_used: locked.len() as u64,
        counters,
        mutexes: Vec::new(),
    };

    if locked.is_empty() {
        write!(out, "\nmutrace: No mutexes used.\n")?;
        return Ok(document);
    }

    write!(out, "\nmutrace: {} mutexes used.\n", document.mutexes_used)?;

    for (id, record) in locked.records_mut().enumerate() {
        record.report_id = Some(id as u32);
    }

    let mut table: Vec<(u32, &MutexRecord)> = locked
        .records()
        .enumerate()
        .map(|(id, record)| (id as u32, record))
        .collect();

    for (id, record) in &table {
        if !is_shown(record, thresholds) {
            continue;
        }
        write!(
            out,
            "\nMutex #{} ({}) first referenced by:\n{}",
            id,
            record.identity,
            record.first_use_trace
        )?;
    }

    table.sort_by(|(_, a), (_, b)| report_order(a, b));

    write!(
        out,
        "\n Mutex #   Locked  Changed    Cont. tot.Time[ms] avg.Time[ms] max.Time[ms]\n"
    )?;

    for (id, record) in &table {
        let shown = is_shown(record, thresholds);
        if shown {
            write_row(record, *id, out)?;
        }
        document.mutexes.push(ReportEntry {
            shown,
            stats: record.stats(),
        });
    }

    out.flush()?;
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{MutexId, OwnerId};

    const A: OwnerId = OwnerId::new(11);
    const B: OwnerId = OwnerId::new(22);
    const MS: u64 = 1_000_000;

    struct Clock(u64);

    /// Drive one record through (owner, contended, hold) acquisitions.
    fn exercise(
        registry: &Registry,
        clock: &mut Clock,
        address: usize,
        trace: &str,
        holds: &[(OwnerId, bool, u64)],
    ) {
        let id = MutexId::new(address);
        for &(owner, contended, hold) in holds {
            let mut record = registry.acquire(id, || trace.to_string()).unwrap();
            let (record, counters) = record.parts();
            record.note_acquired(contended, owner, clock.0, counters);
            clock.0 += hold;
            record.note_released(clock.0, counters);
            clock.0 += MS;
        }
    }

    fn populated_registry() -> Registry {
        let registry = Registry::new(557);
        let mut clock = Clock(0);

        exercise(
            &registry,
            &mut clock,
            0x3000,
            "\t./app(init+0x30) [0x403030]\n",
            &[(A, false, MS)],
        );
        exercise(
            &registry,
            &mut clock,
            0x1000,
            "\t./app(worker+0x10) [0x401010]\n",
            &[
                (A, false, 1_500_000),
                (B, true, 2 * MS),
                (A, false, 500_000),
            ],
        );
        exercise(
            &registry,
            &mut clock,
            0x2000,
            "\t./app(flush+0x20) [0x402020]\n",
            &[(A, false, MS), (B, false, MS), (A, false, MS)],
        );

        // Locked twice without an unlock in between.
        {
            let mut record = registry
                .acquire(MutexId::new(0x2000), String::new)
                .unwrap();
            let (record, counters) = record.parts();
            record.note_acquired(false, A, clock.0, counters);
            record.note_acquired(false, A, clock.0, counters);
        }

        registry
    }

    fn render(registry: &Registry, thresholds: &ShowThresholds) -> (String, ReportDocument) {
        let mut out = Vec::new();
        let document = write_report(registry, thresholds, &mut out).unwrap();
        (String::from_utf8(out).unwrap(), document)
    }

    #[test]
    fn report_layout() {
        let registry = populated_registry();
        let (output, _) = render(&registry, &ShowThresholds::default());
        insta::assert_snapshot!(output, @r"
mutrace: WARNING: 1 inconsistent mutex uses detected. Results might not be reliable.
mutrace:          Fix your program first!

mutrace: 3 mutexes used.

Mutex #1 (0x1000) first referenced by:
	./app(worker+0x10) [0x401010]

Mutex #2 (0x2000) first referenced by:
	./app(flush+0x20) [0x402020]

 Mutex #   Locked  Changed    Cont. tot.Time[ms] avg.Time[ms] max.Time[ms]
       1        3        2        1        4.000        1.333        2.000
       2        5        2        0        3.000        0.600        1.000 inconsistent!
");
    }

    #[test]
    fn document_keeps_hidden_records_in_ranked_order() {
        let registry = populated_registry();
        let (_, document) = render(&registry, &ShowThresholds::default());

        assert_eq!(document.mutexes_used, 3);
        assert_eq!(document.counters.inconsistent, 1);
        let ranked: Vec<(u64, bool, Option<u32>)> = document
            .mutexes
            .iter()
            .map(|e| (e.stats.address, e.shown, e.stats.report_id))
            .collect();
        assert_eq!(
            ranked,
            vec![
                (0x1000, true, Some(1)),
                (0x2000, true, Some(2)),
                (0x3000, false, Some(0)),
            ]
        );
        let json = document.to_json().unwrap();
        assert!(json.contains("contended_count"));
    }

    #[test]
    fn zero_thresholds_show_everything() {
        let registry = populated_registry();
        let thresholds = ShowThresholds {
            locked_min: 0,
            owner_changed_min: 0,
            contended_min: 0,
        };
        let (output, document) = render(&registry, &thresholds);
        assert!(output.contains("Mutex #0 (0x3000) first referenced by:\n\t./app(init+0x30) [0x403030]\n"));
        assert!(output.contains(
            "       0        1        0        0        1.000        1.000        1.000\n"
        ));
        assert!(document.mutexes.iter().all(|e| e.shown));
    }

    #[test]
    fn empty_registry_reports_no_mutexes() {
        let registry = Registry::new(7);
        let (output, document) = render(&registry, &ShowThresholds::default());
        assert_eq!(output, "\nmutrace: No mutexes used.\n");
        assert_eq!(document.mutexes_used, 0);
        assert!(registry.is_sealed());
    }

    #[test]
    fn warnings_name_the_remedy() {
        let registry = Registry::new(1);
        drop(registry.acquire(MutexId::new(0x10), String::new));
        drop(registry.acquire(MutexId::new(0x20), String::new));
        let (output, _) = render(&registry, &ShowThresholds::default());
        assert!(output.starts_with(
            "\nmutrace: WARNING: 1 internal hash collisions detected. Results might not be as reliable as they could be.\n\
             mutrace:          Try to increase MUTRACE_HASH_SIZE, which is currently at 1.\n"
        ));
        assert!(output.contains("\nmutrace: 2 mutexes used.\n"));
    }

    #[test]
    fn retired_records_are_counted_and_numbered_after_live_ones() {
        let registry = Registry::new(557);
        let id = MutexId::new(0x1000);
        registry.reinit(id, || "old".to_string());
        registry.reinit(id, || "new".to_string());
        let (output, document) = render(&registry, &ShowThresholds::default());
        assert!(output.contains("\nmutrace: 2 mutexes used.\n"));
        let traces: Vec<(Option<u32>, &str)> = document
            .mutexes
            .iter()
            .map(|e| (e.stats.report_id, e.stats.first_use_trace.as_str()))
            .collect();
        // Equal keys and address: the higher report id ranks first.
        assert_eq!(traces, vec![(Some(1), "old"), (Some(0), "new")]);
    }

    #[test]
    fn ties_break_on_address_descending() {
        let registry = Registry::new(557);
        for address in [0x1000usize, 0x3000, 0x2000] {
            drop(registry.acquire(MutexId::new(address), String::new));
        }
        let (_, document) = render(&registry, &ShowThresholds::default());
        let addresses: Vec<u64> = document.mutexes.iter().map(|e| e.stats.address).collect();
        assert_eq!(addresses, vec![0x3000, 0x2000, 0x1000]);
    }

    #[test]
    fn reporter_prints_exactly_once() {
        let registry = populated_registry();
        let reporter = Reporter::new();
        let mut first = Vec::new();
        let mut second = Vec::new();
        assert!(
            reporter
                .report_once(&registry, &ShowThresholds::default(), &mut first)
                .unwrap()
                .is_some()
        );
        assert!(
            reporter
                .report_once(&registry, &ShowThresholds::default(), &mut second)
                .unwrap()
                .is_none()
        );
        assert!(!first.is_empty());
        assert!(second.is_empty());
        assert!(reporter.is_done());
    }
}
