use steptrace::codec::extract_bbs_from_pc_trace;
use steptrace::domain::{ThreadId, INSTR_SZ, PAGE_SZ};
use steptrace::pool::WorkerPool;
use steptrace::regions::{ImageRegion, RegionTable};
use steptrace::session::{SessionConfig, TraceReader, TraceSession};
use steptrace::symbols::{Symbol, SymbolTable};
use steptrace_format::cpu::CpuState;

const APP_BASE: u64 = 0x1_0000_0000;
const LIB_BASE: u64 = 0x2_0000_0000;

fn make_regions(app_fill: u8) -> RegionTable {
    RegionTable::new(vec![
        ImageRegion::new(
            APP_BASE,
            PAGE_SZ,
            0,
            [0xaa; 16],
            false,
            "/bin/app".into(),
            vec![app_fill; PAGE_SZ as usize],
        ),
        ImageRegion::new(
            LIB_BASE,
            PAGE_SZ,
            0x1000,
            [0xbb; 16],
            false,
            "/usr/lib/libc.dylib".into(),
            vec![0x55; PAGE_SZ as usize],
        ),
    ])
    .expect("Failed to build region table")
}

fn make_symbols() -> SymbolTable {
    SymbolTable::new(vec![
        Symbol { base: APP_BASE + 0x100, size: 0x40, name: "_hot".into(), path: "/bin/app".into() },
        Symbol { base: APP_BASE + 0x800, size: 0x40, name: "_cold".into(), path: "/bin/app".into() },
        Symbol { base: LIB_BASE + 0x10, size: 0x20, name: "_memcpy".into(), path: "/usr/lib/libc.dylib".into() },
    ])
}

/// Drive two threads through a session: one pc-only, one full-state.
fn log_events(session: &TraceSession) -> (Vec<u64>, Vec<CpuState>) {
    let mut pcs = Vec::new();
    let mut pc = APP_BASE + 0x100;
    for i in 0..32u64 {
        if i == 10 {
            pc = APP_BASE + 0x120; // short branch inside _hot
        }
        session.log_pc(ThreadId(1), pc);
        pcs.push(pc);
        pc += INSTR_SZ;
    }

    let mut states = Vec::new();
    let mut st = CpuState { pc: LIB_BASE + 0x10, sp: 0x7fff_0000, ..CpuState::default() };
    for i in 0..16u64 {
        if i > 0 {
            st.pc += INSTR_SZ;
            st.x[(i % 5) as usize] = i * 1000;
        }
        session.log_state(ThreadId(2), &st);
        states.push(st);
    }
    (pcs, states)
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_buffered_session_round_trips_through_disk() {
    init_logging();
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let cfg = SessionConfig::new(dir.path());
    let session =
        TraceSession::new(cfg, make_regions(0x11), make_symbols()).expect("Failed to open session");
    let (pcs, states) = log_events(&session);
    session.finalize().expect("Failed to finalize session");

    let pool = WorkerPool::new(4);
    let reader = TraceReader::load(dir.path(), &pool).expect("Failed to load trace");

    assert_eq!(reader.num_threads(), 2);
    let t1 = reader.thread(ThreadId(1)).expect("thread 1 missing");
    assert_eq!(t1.num_inst, pcs.len() as u64);
    assert_eq!(t1.pcs().expect("Failed to decode thread 1"), pcs);

    let t2 = reader.thread(ThreadId(2)).expect("thread 2 missing");
    let replayed: Result<Vec<CpuState>, _> = t2.replay().collect();
    assert_eq!(replayed.expect("Failed to replay thread 2"), states);

    // Region snapshots survive byte-for-byte and stay addressable by page.
    assert_eq!(reader.regions.len(), 2);
    assert_eq!(reader.regions.lookup_page(APP_BASE).expect("app page missing")[0], 0x11);
    assert_eq!(reader.regions.lookup_page(LIB_BASE).expect("lib page missing")[0], 0x55);

    // Only symbols overlapping executed code made it into meta.bin.
    let names: Vec<&str> = reader.symbols.symbols().iter().map(|s| s.name.as_str()).collect();
    assert!(names.contains(&"_hot"));
    assert!(names.contains(&"_memcpy"));
    assert!(!names.contains(&"_cold"));

    // Decoded pcs reconstruct the expected blocks.
    let bbs = extract_bbs_from_pc_trace(&t1.pcs().expect("decode"));
    assert_eq!(bbs.len(), 2);
    assert_eq!(bbs[0].start, APP_BASE + 0x100);
    assert_eq!(bbs[0].size, 10 * INSTR_SZ as u32);
}

#[test]
fn test_unchanged_region_snapshot_is_reused_not_rewritten() {
    init_logging();
    let dir = tempfile::tempdir().expect("Failed to create temp dir");

    let session = TraceSession::new(SessionConfig::new(dir.path()), make_regions(0x11), make_symbols())
        .expect("Failed to open session");
    log_events(&session);
    session.finalize().expect("Failed to finalize first session");

    let region_file = std::fs::read_dir(dir.path())
        .expect("Failed to list dir")
        .filter_map(Result::ok)
        .map(|e| e.path())
        .find(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().starts_with("macho-region-app-"))
                .unwrap_or(false)
        })
        .expect("app region snapshot missing");

    // A read-only snapshot would make any rewrite attempt fail loudly.
    let mut perms = std::fs::metadata(&region_file).expect("stat").permissions();
    perms.set_readonly(true);
    std::fs::set_permissions(&region_file, perms.clone()).expect("chmod");

    let session = TraceSession::new(SessionConfig::new(dir.path()), make_regions(0x11), make_symbols())
        .expect("Failed to reopen session");
    log_events(&session);
    session.finalize().expect("Second finalize must reuse the unchanged snapshot");

    perms.set_readonly(false);
    std::fs::set_permissions(&region_file, perms).expect("chmod back");

    // Changing the region bytes replaces the snapshot and removes the stale one.
    let session = TraceSession::new(SessionConfig::new(dir.path()), make_regions(0x22), make_symbols())
        .expect("Failed to reopen session");
    log_events(&session);
    session.finalize().expect("Failed to finalize with changed region");

    assert!(!region_file.exists(), "stale snapshot should have been deleted");
    let replaced = std::fs::read_dir(dir.path())
        .expect("Failed to list dir")
        .filter_map(Result::ok)
        .any(|e| e.file_name().to_string_lossy().starts_with("macho-region-app-"));
    assert!(replaced, "replacement snapshot missing");
}

#[test]
fn test_region_with_partial_tail_slot_finalizes() {
    init_logging();
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let base = 0x3_0000_0000u64;
    // 10 bytes: two whole instruction slots plus a partial third.
    let regions = RegionTable::new(vec![ImageRegion::new(
        base,
        10,
        0,
        [0; 16],
        false,
        "/bin/tiny".into(),
        vec![0x77; 10],
    )])
    .expect("Failed to build region table");
    let session = TraceSession::new(SessionConfig::new(dir.path()), regions, SymbolTable::default())
        .expect("Failed to open session");
    session.log_pc(ThreadId(1), base + 8);
    session.finalize().expect("Failed to finalize with a pc in the partial tail slot");

    let pool = WorkerPool::new(1);
    let reader = TraceReader::load(dir.path(), &pool).expect("Failed to load trace");
    let t1 = reader.thread(ThreadId(1)).expect("thread 1 missing");
    assert_eq!(t1.pcs().expect("Failed to decode"), vec![base + 8]);
}

#[test]
fn test_wide_thread_ids_survive_a_round_trip() {
    init_logging();
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let session =
        TraceSession::new(SessionConfig::new(dir.path()), make_regions(0x11), make_symbols())
            .expect("Failed to open session");
    // Ids past 32 bits must keep their full wire width through disk.
    let tid = ThreadId((1u64 << 40) + 7);
    session.log_pc(tid, APP_BASE + 0x100);
    session.log_pc(tid, APP_BASE + 0x104);
    session.finalize().expect("Failed to finalize session");

    let pool = WorkerPool::new(1);
    let reader = TraceReader::load(dir.path(), &pool).expect("Failed to load trace");
    let t = reader.thread(tid).expect("wide thread id missing");
    assert_eq!(t.tid, tid);
    assert_eq!(t.num_inst, 2);
}

#[test]
fn test_streamed_session_round_trips_and_over_includes_symbols() {
    init_logging();
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut cfg = SessionConfig::new(dir.path());
    cfg.stream = true;
    let session =
        TraceSession::new(cfg, make_regions(0x33), make_symbols()).expect("Failed to open session");
    let (pcs, _) = log_events(&session);
    session.finalize().expect("Failed to finalize streamed session");

    let pool = WorkerPool::new(2);
    let reader = TraceReader::load(dir.path(), &pool).expect("Failed to load streamed trace");
    let t1 = reader.thread(ThreadId(1)).expect("thread 1 missing");
    assert_eq!(t1.pcs().expect("Failed to decode"), pcs);

    // Streamed finalize assumes whole-region coverage, so even the
    // never-executed symbol is present.
    assert_eq!(reader.symbols.len(), 3);
}
