//! Trace session orchestration and trace-directory reload.
//!
//! [`TraceSession`] owns the per-thread encode contexts and, on
//! [`finalize`](TraceSession::finalize), serializes a complete trace
//! directory:
//!
//! ```text
//! trace-dir/
//! ├── meta.bin                       region + filtered symbol descriptors
//! ├── macho-region-<name>-<hex>.bin  one per unique content digest
//! └── thread-<tid>.bin               delta-encoded instruction stream
//! ```
//!
//! Region snapshot files are keyed by content digest: an unchanged region
//! keeps its file from a previous finalize untouched, and snapshot files
//! whose digest no longer appears are deleted. [`TraceReader::load`]
//! re-reads a directory, fanning the per-file decompression across the
//! worker pool.

use crate::bitvec::SingleBits;
use crate::codec::{decode_pcs, LogSink, StateReplay, ThreadTraceContext, SYNC_EVERY};
use crate::compressed_file::{CompressedFileReader, CompressedFileWriter};
use crate::domain::{SessionError, ThreadId, TraceError, INSTR_SZ};
use crate::mph::MphMap;
use crate::pool::WorkerPool;
use crate::regions::{ImageRegion, RegionTable};
use crate::symbols::{Symbol, SymbolTable};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use steptrace_format::headers::{MetaHeader, RegionFileHeader, ThreadHeader};
use steptrace_format::records::{RegionRecord, SymRecord};
use steptrace_format::ByteReader;

const META_FILE: &str = "meta.bin";
const REGION_PREFIX: &str = "macho-region-";
const THREAD_PREFIX: &str = "thread-";

/// Compression level for region snapshot bodies.
const REGION_LEVEL: u32 = 1;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub trace_dir: PathBuf,
    /// zlib level for thread files; 0 stores them raw.
    pub compression_level: u32,
    /// Stream thread logs straight into their files instead of buffering.
    pub stream: bool,
    /// Byte budget between forced sync frames.
    pub sync_every: usize,
}

impl SessionConfig {
    #[must_use]
    pub fn new(trace_dir: impl Into<PathBuf>) -> Self {
        Self {
            trace_dir: trace_dir.into(),
            compression_level: 3,
            stream: false,
            sync_every: SYNC_EVERY,
        }
    }
}

/// A live tracing session collecting events from the stepping machinery.
pub struct TraceSession {
    cfg: SessionConfig,
    regions: RegionTable,
    symbols: SymbolTable,
    // Creation of a context is synchronized here; after first touch only
    // the owning thread locks its own context, so the hot path never
    // contends on the map.
    ctxs: RwLock<HashMap<ThreadId, Arc<Mutex<ThreadTraceContext>>>>,
}

impl TraceSession {
    /// Open a session, creating the trace directory.
    ///
    /// # Errors
    /// Directory creation failure.
    pub fn new(cfg: SessionConfig, regions: RegionTable, symbols: SymbolTable) -> Result<Self> {
        std::fs::create_dir_all(&cfg.trace_dir)
            .with_context(|| format!("creating trace dir {}", cfg.trace_dir.display()))?;
        info!(
            "trace session at {} ({} regions, {} symbols, {})",
            cfg.trace_dir.display(),
            regions.len(),
            symbols.len(),
            if cfg.stream { "streamed" } else { "buffered" },
        );
        Ok(Self { cfg, regions, symbols, ctxs: RwLock::new(HashMap::new()) })
    }

    /// Record one instruction by pc for `tid`.
    pub fn log_pc(&self, tid: ThreadId, pc: u64) {
        let ctx = self.ctx(tid);
        let mut ctx = ctx.lock().unwrap_or_else(PoisonError::into_inner);
        ctx.log_pc(pc);
    }

    /// Record one instruction with full register state for `tid`.
    pub fn log_state(&self, tid: ThreadId, st: &steptrace_format::cpu::CpuState) {
        let ctx = self.ctx(tid);
        let mut ctx = ctx.lock().unwrap_or_else(PoisonError::into_inner);
        ctx.log_state(st);
    }

    fn ctx(&self, tid: ThreadId) -> Arc<Mutex<ThreadTraceContext>> {
        if let Some(ctx) =
            self.ctxs.read().unwrap_or_else(PoisonError::into_inner).get(&tid)
        {
            return Arc::clone(ctx);
        }
        let mut ctxs = self.ctxs.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(ctxs.entry(tid).or_insert_with(|| {
            let sink = if self.cfg.stream {
                let hdr = ThreadHeader { thread_id: tid.0, num_inst: 0 };
                LogSink::Stream(CompressedFileWriter::create(
                    &self.cfg.trace_dir.join(format!("{THREAD_PREFIX}{}.bin", tid.0)),
                    ThreadHeader::MAGIC,
                    &hdr.to_bytes(),
                    self.cfg.compression_level,
                ))
            } else {
                LogSink::Buffer(Vec::new())
            };
            Arc::new(Mutex::new(ThreadTraceContext::new(tid, sink, self.cfg.sync_every)))
        }))
    }

    /// Flush everything to the trace directory.
    ///
    /// # Errors
    /// I/O failure or an undecodable in-memory log.
    pub fn finalize(self) -> Result<()> {
        let map =
            std::mem::take(&mut *self.ctxs.write().unwrap_or_else(PoisonError::into_inner));
        let ctxs: Vec<ThreadTraceContext> = map
            .into_values()
            .map(|ctx| {
                Arc::try_unwrap(ctx)
                    .map(|m| m.into_inner().unwrap_or_else(PoisonError::into_inner))
                    .map_err(|_| anyhow::anyhow!("a trace context is still shared at finalize"))
            })
            .collect::<Result<_, _>>()?;

        let intervals = self.executed_intervals(&ctxs)?;
        let syms = self.symbols.symbols_in_intervals(&intervals);
        debug!("finalize: {} of {} symbols overlap executed code", syms.len(), self.symbols.len());

        self.write_meta(&syms).context("writing meta.bin")?;
        self.write_region_files().context("writing region files")?;

        for ctx in ctxs {
            let tid = ctx.tid();
            let num_inst = ctx.num_inst();
            let hdr = ThreadHeader { thread_id: tid.0, num_inst };
            match ctx.into_sink() {
                LogSink::Buffer(buf) => {
                    let path = self.cfg.trace_dir.join(format!("{THREAD_PREFIX}{}.bin", tid.0));
                    let mut w = CompressedFileWriter::create(
                        &path,
                        ThreadHeader::MAGIC,
                        &hdr.to_bytes(),
                        self.cfg.compression_level,
                    );
                    w.write(&buf);
                    w.close().with_context(|| format!("writing log for {tid}"))?;
                }
                LogSink::Stream(mut w) => {
                    w.set_header(&hdr.to_bytes());
                    w.close().with_context(|| format!("closing streamed log for {tid}"))?;
                }
            }
            info!("finalized {tid}: {num_inst} instructions");
        }
        Ok(())
    }

    /// Half-open address intervals of executed code, used to filter the
    /// symbol table down to what the trace actually touched.
    fn executed_intervals(&self, ctxs: &[ThreadTraceContext]) -> Result<Vec<(u64, u64)>> {
        if self.cfg.stream {
            // FIXME: streamed logs are on disk already, so exact executed-pc
            // tracking would need a full decode pass; assume whole-region
            // coverage, which over-includes symbols.
            return Ok(self
                .regions
                .regions()
                .iter()
                .map(|r| (r.base, r.base + r.size))
                .collect());
        }

        // One bit per instruction slot per region; a region whose size is
        // not a multiple of the instruction width still gets a slot for the
        // partial tail.
        let mut executed: Vec<SingleBits> = self
            .regions
            .regions()
            .iter()
            .map(|r| SingleBits::new(r.size.div_ceil(INSTR_SZ) as usize))
            .collect();
        for ctx in ctxs {
            let Some(buf) = ctx.buffer() else { continue };
            let pcs = decode_pcs(buf)
                .with_context(|| format!("decoding in-memory log for {}", ctx.tid()))?;
            for pc in pcs {
                if let Some(idx) = self.regions.lookup_idx(pc) {
                    let slot = (pc - self.regions.regions()[idx].base) / INSTR_SZ;
                    executed[idx].set(slot as usize, true);
                } else {
                    warn!("executed pc {pc:#x} outside every region");
                }
            }
        }

        let mut intervals = Vec::new();
        for (region, bits) in self.regions.regions().iter().zip(&executed) {
            let mut run_start: Option<u64> = None;
            let mut prev = 0u64;
            for slot in bits.iter_ones() {
                let slot = slot as u64;
                match run_start {
                    Some(_) if slot == prev + 1 => {}
                    Some(start) => {
                        intervals
                            .push((region.base + start * INSTR_SZ, region.base + (prev + 1) * INSTR_SZ));
                        run_start = Some(slot);
                    }
                    None => run_start = Some(slot),
                }
                prev = slot;
            }
            if let Some(start) = run_start {
                intervals.push((region.base + start * INSTR_SZ, region.base + (prev + 1) * INSTR_SZ));
            }
        }
        intervals.sort_unstable();
        Ok(intervals)
    }

    fn write_meta(&self, syms: &[Symbol]) -> Result<()> {
        let hdr = MetaHeader {
            num_regions: self.regions.len() as u64,
            num_syms: syms.len() as u64,
        };
        // Descriptors are tiny; store them raw.
        let mut w = CompressedFileWriter::create(
            &self.cfg.trace_dir.join(META_FILE),
            MetaHeader::MAGIC,
            &hdr.to_bytes(),
            0,
        );
        let mut body = Vec::new();
        for region in self.regions.regions() {
            region.to_record().encode(&mut body);
        }
        for sym in syms {
            sym.to_record().encode(&mut body);
        }
        w.write(&body);
        w.close()?;
        Ok(())
    }

    /// Write one snapshot file per unique digest, reusing files whose digest
    /// is unchanged and deleting snapshots no current region refers to.
    fn write_region_files(&self) -> Result<()> {
        let mut wanted: HashMap<String, &ImageRegion> = HashMap::new();
        for region in self.regions.regions() {
            wanted.entry(region.log_path()).or_insert(region);
        }

        for entry in std::fs::read_dir(&self.cfg.trace_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(REGION_PREFIX) || !name.ends_with(".bin") {
                continue;
            }
            if wanted.remove(&name).is_some() {
                debug!("reusing region snapshot {name}");
            } else {
                debug!("removing stale region snapshot {name}");
                std::fs::remove_file(entry.path())
                    .with_context(|| format!("removing stale {name}"))?;
            }
        }

        for (name, region) in wanted {
            let hdr = RegionFileHeader { digest_sha256: region.digest_sha256 };
            let mut w = CompressedFileWriter::create(
                &self.cfg.trace_dir.join(&name),
                RegionFileHeader::MAGIC,
                &hdr.to_bytes(),
                REGION_LEVEL,
            );
            w.write(&region.bytes);
            w.close().with_context(|| format!("writing {name}"))?;
        }
        Ok(())
    }
}

/// One decoded thread of a reloaded trace.
#[derive(Debug, Clone)]
pub struct ThreadTrace {
    pub tid: ThreadId,
    pub num_inst: u64,
    pub body: Vec<u8>,
}

impl ThreadTrace {
    /// Program-counter sequence of this thread.
    ///
    /// # Errors
    /// A corrupt or truncated body.
    pub fn pcs(&self) -> Result<Vec<u64>, TraceError> {
        decode_pcs(&self.body)
    }

    /// Full snapshot replay of this thread.
    #[must_use]
    pub fn replay(&self) -> StateReplay<'_> {
        StateReplay::new(&self.body)
    }
}

/// A trace directory loaded back into memory.
pub struct TraceReader {
    pub regions: RegionTable,
    pub symbols: SymbolTable,
    threads: MphMap<u64, ThreadTrace>,
}

impl TraceReader {
    /// Load a trace directory, reading region and thread files in parallel
    /// on `pool`.
    ///
    /// # Errors
    /// A missing or corrupt file, digest bytes absent for a region, or a
    /// thread body whose message count disagrees with its header.
    pub fn load(dir: &Path, pool: &WorkerPool) -> Result<Self> {
        let meta_path = dir.join(META_FILE);
        if !meta_path.exists() {
            return Err(SessionError::NoMeta(dir.to_path_buf()).into());
        }
        let mut meta =
            CompressedFileReader::open(&meta_path, MetaHeader::MAGIC, MetaHeader::SIZE)
                .map_err(SessionError::File)?;
        let hdr = MetaHeader::parse(meta.header_bytes()).map_err(TraceError::Format)?;
        let body = meta.read_all().map_err(SessionError::File)?;
        let mut r = ByteReader::new(body);
        let mut records = Vec::with_capacity(hdr.num_regions as usize);
        for _ in 0..hdr.num_regions {
            records.push(RegionRecord::decode(&mut r).map_err(TraceError::Format)?);
        }
        let mut syms = Vec::with_capacity(hdr.num_syms as usize);
        for _ in 0..hdr.num_syms {
            syms.push(Symbol::from_record(SymRecord::decode(&mut r).map_err(TraceError::Format)?));
        }

        let mut region_paths = Vec::new();
        let mut thread_paths = Vec::new();
        for entry in std::fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
            let path = entry?.path();
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            if !name.ends_with(".bin") {
                continue;
            }
            if name.starts_with(REGION_PREFIX) {
                region_paths.push(path);
            } else if name.starts_with(THREAD_PREFIX) {
                thread_paths.push(path);
            }
        }

        let expected_files: HashSet<String> = records
            .iter()
            .map(|rec| {
                ImageRegion::log_path_for(
                    &ImageRegion::display_name(&rec.path, rec.base),
                    &rec.digest_sha256,
                )
            })
            .collect();
        if expected_files.len() != region_paths.len() {
            return Err(SessionError::RegionCountMismatch {
                stated: expected_files.len() as u64,
                found: region_paths.len(),
            }
            .into());
        }

        let region_jobs: Vec<_> = region_paths
            .into_iter()
            .map(|path| {
                move || -> Result<([u8; 32], Vec<u8>), SessionError> {
                    let mut rdr = CompressedFileReader::open(
                        &path,
                        RegionFileHeader::MAGIC,
                        RegionFileHeader::SIZE,
                    )?;
                    let hdr = RegionFileHeader::parse(rdr.header_bytes())
                        .map_err(|e| SessionError::Trace(TraceError::Format(e)))?;
                    let bytes = rdr.read_all()?.to_vec();
                    Ok((hdr.digest_sha256, bytes))
                }
            })
            .collect();
        let mut bytes_by_digest: HashMap<[u8; 32], Vec<u8>> = HashMap::new();
        for result in pool.run_batch(region_jobs) {
            let (digest, bytes) = result?;
            bytes_by_digest.insert(digest, bytes);
        }

        let mut regions = Vec::with_capacity(records.len());
        for rec in records {
            let bytes = bytes_by_digest.get(&rec.digest_sha256).cloned().ok_or_else(|| {
                SessionError::MissingRegionBytes { digest_hex: hex::encode(rec.digest_sha256) }
            })?;
            regions.push(ImageRegion::from_record(rec, bytes));
        }

        let thread_jobs: Vec<_> = thread_paths
            .into_iter()
            .map(|path| {
                move || -> Result<ThreadTrace, SessionError> {
                    let mut rdr =
                        CompressedFileReader::open(&path, ThreadHeader::MAGIC, ThreadHeader::SIZE)?;
                    let hdr = ThreadHeader::parse(rdr.header_bytes())
                        .map_err(|e| SessionError::Trace(TraceError::Format(e)))?;
                    let body = rdr.read_all()?.to_vec();
                    let tid = ThreadId(hdr.thread_id);
                    let decoded = decode_pcs(&body).map_err(SessionError::Trace)?.len() as u64;
                    if decoded != hdr.num_inst {
                        return Err(SessionError::Trace(TraceError::InstCountMismatch {
                            tid,
                            stated: hdr.num_inst,
                            decoded,
                        }));
                    }
                    Ok(ThreadTrace { tid, num_inst: hdr.num_inst, body })
                }
            })
            .collect();
        let mut thread_pairs = Vec::new();
        for result in pool.run_batch(thread_jobs) {
            let thread = result?;
            thread_pairs.push((thread.tid.0, thread));
        }
        thread_pairs.sort_by_key(|(tid, _)| *tid);
        let threads = MphMap::from_pairs(thread_pairs).map_err(SessionError::Mph)?;

        info!(
            "loaded trace from {}: {} regions, {} symbols, {} threads",
            dir.display(),
            regions.len(),
            syms.len(),
            threads.len(),
        );
        Ok(Self {
            regions: RegionTable::new(regions).map_err(SessionError::Mph)?,
            symbols: SymbolTable::new(syms),
            threads,
        })
    }

    #[must_use]
    pub fn thread(&self, tid: ThreadId) -> Option<&ThreadTrace> {
        self.threads.get(tid.0)
    }

    pub fn threads(&self) -> impl Iterator<Item = &ThreadTrace> {
        self.threads.values()
    }

    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }
}
