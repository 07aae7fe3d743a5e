//! Append-only binary trajectory files.
//!
//! # Layout
//!
//! All integers and floats are little-endian.
//!
//! ```text
//! header  magic "DEMTRAJ\0" | version u32 | stride u64 | dt f64
//!         | min count u32 | max count u32 | record size u32
//!         | material count u32, then (len u16, utf-8) per material
//!         | geometry (len u16, utf-8)
//! frame   "FRME" | step u64 | time f64 | count u32 | count x FrameRecord
//! ```
//!
//! The min/max particle counts are patched in when the writer finishes.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

use bytemuck::{Pod, Zeroable};
use kernel::SimulationState;
use tracing::warn;

use crate::error::RunError;
use crate::retry::RetryPolicy;

/// File magic.
pub const MAGIC: [u8; 8] = *b"DEMTRAJ\0";
/// Format version.
pub const VERSION: u32 = 1;
/// Frame tag.
pub const FRAME_TAG: [u8; 4] = *b"FRME";

const COUNTS_OFFSET: u64 = 28;

// Records are written straight from memory.
const _: () = assert!(cfg!(target_endian = "little"));
const _: () = assert!(std::mem::size_of::<FrameRecord>() == 40);

/// Per-sphere record, 40 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct FrameRecord {
    /// Stable sphere id
    pub id: u32,
    /// Radius (m)
    pub radius: f32,
    /// Centre (m)
    pub position: [f32; 3],
    /// Linear velocity (m/s)
    pub velocity: [f32; 3],
    /// |velocity|
    pub speed: f32,
    /// |contact force| from the last force pass
    pub force_magnitude: f32,
}

/// Snapshot of every sphere at one step. Never mutated once written.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultFrame {
    /// Completed steps
    pub step: u64,
    /// Simulated time
    pub time: f64,
    /// One record per sphere in store order
    pub records: Vec<FrameRecord>,
}

impl ResultFrame {
    /// Capture the current state.
    pub fn capture(state: &SimulationState) -> Self {
        let p = &state.particles;
        let records = (0..p.len())
            .map(|i| {
                let v = p.velocity[i];
                FrameRecord {
                    id: p.id[i],
                    radius: p.radius[i] as f32,
                    position: p.position[i].as_vec3().to_array(),
                    velocity: v.as_vec3().to_array(),
                    speed: v.length() as f32,
                    force_magnitude: p.force[i].length() as f32,
                }
            })
            .collect();
        Self {
            step: state.step,
            time: state.time,
            records,
        }
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.clear();
        buf.extend_from_slice(&FRAME_TAG);
        buf.extend_from_slice(&self.step.to_le_bytes());
        buf.extend_from_slice(&self.time.to_le_bytes());
        buf.extend_from_slice(&(self.records.len() as u32).to_le_bytes());
        buf.extend_from_slice(bytemuck::cast_slice(&self.records));
    }
}

/// Trajectory header.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryHeader {
    /// Steps between frames
    pub output_stride: u64,
    /// Timestep
    pub dt: f64,
    /// Smallest record count over all frames
    pub min_particles: u32,
    /// Largest record count over all frames
    pub max_particles: u32,
    /// Material names in id order
    pub materials: Vec<String>,
    /// Geometry reference
    pub geometry: String,
}

impl TrajectoryHeader {
    /// Header for a new file; counts are filled in by the writer.
    pub fn new(output_stride: u64, dt: f64, materials: Vec<String>, geometry: impl Into<String>) -> Self {
        Self {
            output_stride,
            dt,
            min_particles: 0,
            max_particles: 0,
            materials,
            geometry: geometry.into(),
        }
    }

    fn encode(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&MAGIC);
        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf.extend_from_slice(&self.output_stride.to_le_bytes());
        buf.extend_from_slice(&self.dt.to_le_bytes());
        buf.extend_from_slice(&self.min_particles.to_le_bytes());
        buf.extend_from_slice(&self.max_particles.to_le_bytes());
        buf.extend_from_slice(&(std::mem::size_of::<FrameRecord>() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.materials.len() as u32).to_le_bytes());
        for name in &self.materials {
            put_str(&mut buf, name)?;
        }
        put_str(&mut buf, &self.geometry)?;
        Ok(buf)
    }

    fn decode<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(invalid("not a DEM trajectory"));
        }
        let version = read_u32(r)?;
        if version != VERSION {
            return Err(invalid(format!("unsupported trajectory version {version}")));
        }
        let output_stride = read_u64(r)?;
        let dt = f64::from_bits(read_u64(r)?);
        let min_particles = read_u32(r)?;
        let max_particles = read_u32(r)?;
        let record_size = read_u32(r)?;
        if record_size as usize != std::mem::size_of::<FrameRecord>() {
            return Err(invalid(format!("unexpected record size {record_size}")));
        }
        let count = read_u32(r)?;
        let materials = (0..count).map(|_| get_str(r)).collect::<io::Result<Vec<_>>>()?;
        let geometry = get_str(r)?;
        Ok(Self {
            output_stride,
            dt,
            min_particles,
            max_particles,
            materials,
            geometry,
        })
    }
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn put_str(buf: &mut Vec<u8>, s: &str) -> io::Result<()> {
    let len = u16::try_from(s.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "string longer than 65535 bytes"))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

fn get_str<R: Read>(r: &mut R) -> io::Result<String> {
    let mut len = [0u8; 2];
    r.read_exact(&mut len)?;
    let mut bytes = vec![0u8; u16::from_le_bytes(len) as usize];
    r.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| invalid(e.to_string()))
}

fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Streams that can be cut back to a given length.
pub trait Truncate {
    /// Drop everything past `len` bytes.
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl Truncate for File {
    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

impl Truncate for Cursor<Vec<u8>> {
    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.get_mut().truncate(len as usize);
        Ok(())
    }
}

impl<W: Write + Truncate> Truncate for BufWriter<W> {
    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.flush()?;
        self.get_mut().truncate_to(len)
    }
}

/// Appends frames after a header.
///
/// Every write starts by seeking to the end of the last complete frame, so
/// a failed write can simply be repeated. Bytes of a frame that never
/// completed are cut off by [`discard_partial`](Self::discard_partial) and
/// [`finish`](Self::finish).
pub struct TrajectoryWriter<W: Write + Seek + Truncate> {
    inner: W,
    committed: u64,
    min_particles: u32,
    max_particles: u32,
    frames: u64,
    buf: Vec<u8>,
}

impl TrajectoryWriter<BufWriter<File>> {
    /// Create (or truncate) a trajectory file.
    pub fn create(path: impl AsRef<Path>, header: &TrajectoryHeader) -> io::Result<Self> {
        Self::new(BufWriter::new(File::create(path)?), header)
    }
}

impl<W: Write + Seek + Truncate> TrajectoryWriter<W> {
    /// Write the header at the start of `inner`.
    pub fn new(mut inner: W, header: &TrajectoryHeader) -> io::Result<Self> {
        let bytes = header.encode()?;
        inner.seek(SeekFrom::Start(0))?;
        inner.write_all(&bytes)?;
        Ok(Self {
            inner,
            committed: bytes.len() as u64,
            min_particles: u32::MAX,
            max_particles: 0,
            frames: 0,
            buf: Vec::new(),
        })
    }

    /// Append one frame.
    pub fn write_frame(&mut self, frame: &ResultFrame) -> io::Result<()> {
        frame.encode(&mut self.buf);
        self.inner.seek(SeekFrom::Start(self.committed))?;
        self.inner.write_all(&self.buf)?;
        self.inner.flush()?;

        self.committed += self.buf.len() as u64;
        let n = frame.records.len() as u32;
        self.min_particles = self.min_particles.min(n);
        self.max_particles = self.max_particles.max(n);
        self.frames += 1;
        Ok(())
    }

    /// Frames written so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Cut the stream back to the end of the last complete frame.
    pub fn discard_partial(&mut self) -> io::Result<()> {
        self.inner.truncate_to(self.committed)?;
        self.inner.seek(SeekFrom::Start(self.committed))?;
        Ok(())
    }

    /// Patch the particle-count bounds into the header and drop any partial
    /// frame.
    pub fn finish(&mut self) -> io::Result<()> {
        let min = if self.frames == 0 { 0 } else { self.min_particles };
        let mut counts = [0u8; 8];
        counts[..4].copy_from_slice(&min.to_le_bytes());
        counts[4..].copy_from_slice(&self.max_particles.to_le_bytes());
        self.inner.seek(SeekFrom::Start(COUNTS_OFFSET))?;
        self.inner.write_all(&counts)?;
        self.inner.flush()?;
        self.discard_partial()
    }

    /// Consume the writer, returning the sink.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Streams frames from a trajectory one at a time.
pub struct TrajectoryReader<R: Read> {
    inner: R,
    header: TrajectoryHeader,
}

impl TrajectoryReader<BufReader<File>> {
    /// Open a trajectory file.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read> TrajectoryReader<R> {
    /// Read the header.
    pub fn new(mut inner: R) -> io::Result<Self> {
        let header = TrajectoryHeader::decode(&mut inner)?;
        Ok(Self { inner, header })
    }

    /// Parsed header.
    pub fn header(&self) -> &TrajectoryHeader {
        &self.header
    }

    /// Next frame, or `None` at a clean end of file.
    pub fn next_frame(&mut self) -> io::Result<Option<ResultFrame>> {
        let mut tag = [0u8; 4];
        let mut filled = 0;
        while filled < tag.len() {
            match self.inner.read(&mut tag[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        if tag != FRAME_TAG {
            return Err(invalid("missing frame tag"));
        }
        let step = read_u64(&mut self.inner)?;
        let time = f64::from_bits(read_u64(&mut self.inner)?);
        let count = read_u32(&mut self.inner)? as usize;
        let mut records = vec![FrameRecord::zeroed(); count];
        self.inner.read_exact(bytemuck::cast_slice_mut(&mut records))?;
        Ok(Some(ResultFrame { step, time, records }))
    }
}

impl<R: Read> Iterator for TrajectoryReader<R> {
    type Item = io::Result<ResultFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Destination of the frames a run produces.
pub trait FrameSink {
    /// Persist or keep one frame.
    fn write_frame(&mut self, frame: &ResultFrame) -> Result<(), RunError>;

    /// Called once after the last frame.
    fn finish(&mut self) -> Result<(), RunError> {
        Ok(())
    }
}

/// Inline delivery.
impl FrameSink for Vec<ResultFrame> {
    fn write_frame(&mut self, frame: &ResultFrame) -> Result<(), RunError> {
        self.push(frame.clone());
        Ok(())
    }
}

/// Durable delivery with retried writes.
pub struct StorageSink<W: Write + Seek + Truncate> {
    writer: TrajectoryWriter<W>,
    retry: RetryPolicy,
}

impl<W: Write + Seek + Truncate> StorageSink<W> {
    /// Wrap a writer.
    pub fn new(writer: TrajectoryWriter<W>, retry: RetryPolicy) -> Self {
        Self { writer, retry }
    }

    /// Frames written so far.
    pub fn frames(&self) -> u64 {
        self.writer.frames()
    }

    /// Consume the sink, returning the underlying stream.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Seek + Truncate> FrameSink for StorageSink<W> {
    fn write_frame(&mut self, frame: &ResultFrame) -> Result<(), RunError> {
        let writer = &mut self.writer;
        let result = self.retry.run("trajectory frame write", |_| writer.write_frame(frame));
        if result.is_err() {
            if let Err(e) = self.writer.discard_partial() {
                warn!("could not drop partial trajectory frame: {}", e);
            }
        }
        result.map_err(RunError::from)
    }

    fn finish(&mut self) -> Result<(), RunError> {
        let writer = &mut self.writer;
        self.retry
            .run("trajectory finalise", |_| writer.finish())
            .map_err(RunError::from)
    }
}

#[cfg(test)]
mod tests {
    use std::ops::Range;

    use super::*;

    fn frame(step: u64, n: u32) -> ResultFrame {
        ResultFrame {
            step,
            time: step as f64 * 1e-5,
            records: (0..n)
                .map(|i| FrameRecord {
                    id: i,
                    radius: 0.002,
                    position: [i as f32, step as f32, 0.0],
                    velocity: [0.0, -1.0, 0.0],
                    speed: 1.0,
                    force_magnitude: 0.5 * i as f32,
                })
                .collect(),
        }
    }

    fn header() -> TrajectoryHeader {
        TrajectoryHeader::new(10, 1e-5, vec!["glass".into(), "steel".into()], "open_box")
    }

    /// Fails the write calls whose index falls in `fail`, after writing
    /// half of the buffer.
    struct Flaky {
        inner: Cursor<Vec<u8>>,
        fail: Range<usize>,
        calls: usize,
    }

    impl Write for Flaky {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let call = self.calls;
            self.calls += 1;
            if self.fail.contains(&call) {
                self.inner.write_all(&buf[..buf.len() / 2])?;
                return Err(io::Error::other("disk hiccup"));
            }
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for Flaky {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    impl Truncate for Flaky {
        fn truncate_to(&mut self, len: u64) -> io::Result<()> {
            self.inner.truncate_to(len)
        }
    }

    fn read_all(bytes: Vec<u8>) -> Vec<ResultFrame> {
        TrajectoryReader::new(Cursor::new(bytes))
            .unwrap()
            .collect::<io::Result<_>>()
            .unwrap()
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 0,
            multiplier: 1.0,
        }
    }

    #[test]
    fn frames_stream_back_in_order() {
        let mut writer = TrajectoryWriter::new(Cursor::new(Vec::new()), &header()).unwrap();
        writer.write_frame(&frame(0, 3)).unwrap();
        writer.write_frame(&frame(10, 5)).unwrap();
        writer.write_frame(&frame(20, 4)).unwrap();
        writer.finish().unwrap();
        let bytes = writer.into_inner().into_inner();

        let mut reader = TrajectoryReader::new(Cursor::new(bytes)).unwrap();
        let h = reader.header().clone();
        assert_eq!(h.output_stride, 10);
        assert_eq!((h.min_particles, h.max_particles), (3, 5));
        assert_eq!(h.materials, vec!["glass", "steel"]);
        assert_eq!(h.geometry, "open_box");

        assert_eq!(reader.next_frame().unwrap().unwrap(), frame(0, 3));
        assert_eq!(reader.next_frame().unwrap().unwrap(), frame(10, 5));
        assert_eq!(reader.next_frame().unwrap().unwrap().records.len(), 4);
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn header_fields_sit_at_fixed_offsets() {
        let mut writer = TrajectoryWriter::new(Cursor::new(Vec::new()), &header()).unwrap();
        writer.write_frame(&frame(0, 7)).unwrap();
        writer.finish().unwrap();
        let bytes = writer.into_inner().into_inner();
        assert_eq!(&bytes[..8], b"DEMTRAJ\0");
        assert_eq!(u32::from_le_bytes(bytes[8..12].try_into().unwrap()), 1);
        assert_eq!(u64::from_le_bytes(bytes[12..20].try_into().unwrap()), 10);
        assert_eq!(u32::from_le_bytes(bytes[28..32].try_into().unwrap()), 7);
        assert_eq!(u32::from_le_bytes(bytes[36..40].try_into().unwrap()), 40);
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let mut writer = TrajectoryWriter::new(Cursor::new(Vec::new()), &header()).unwrap();
        writer.write_frame(&frame(0, 3)).unwrap();
        let mut bytes = writer.into_inner().into_inner();
        bytes.truncate(bytes.len() - 5);
        let mut reader = TrajectoryReader::new(Cursor::new(bytes)).unwrap();
        assert!(reader.next_frame().is_err());
    }

    #[test]
    fn bad_magic_is_rejected() {
        assert!(TrajectoryReader::new(Cursor::new(b"NOTATRAJECTORY".to_vec())).is_err());
    }

    #[test]
    fn failed_write_is_retried_from_the_last_frame() {
        // Call 0 is the header, 1 the first frame; the second frame fails twice.
        let flaky = Flaky {
            inner: Cursor::new(Vec::new()),
            fail: 2..4,
            calls: 0,
        };
        let writer = TrajectoryWriter::new(flaky, &header()).unwrap();
        let mut sink = StorageSink::new(writer, fast_retry());
        sink.write_frame(&frame(0, 2)).unwrap();
        sink.write_frame(&frame(10, 6)).unwrap();
        sink.write_frame(&frame(20, 1)).unwrap();
        sink.finish().unwrap();
        assert_eq!(sink.frames(), 3);

        let bytes = sink.into_inner().inner.into_inner();
        assert_eq!(read_all(bytes), vec![frame(0, 2), frame(10, 6), frame(20, 1)]);
    }

    #[test]
    fn persistent_failure_reports_attempts() {
        let flaky = Flaky {
            inner: Cursor::new(Vec::new()),
            fail: 1..usize::MAX,
            calls: 0,
        };
        let writer = TrajectoryWriter::new(flaky, &header()).unwrap();
        let mut sink = StorageSink::new(writer, fast_retry());
        match sink.write_frame(&frame(0, 2)) {
            Err(RunError::Storage { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected storage failure, got {other:?}"),
        }
    }

    #[test]
    fn abandoned_frame_leaves_a_readable_file() {
        // Header and two frames succeed, everything after fails half way.
        let flaky = Flaky {
            inner: Cursor::new(Vec::new()),
            fail: 3..usize::MAX,
            calls: 0,
        };
        let writer = TrajectoryWriter::new(flaky, &header()).unwrap();
        let mut sink = StorageSink::new(writer, fast_retry());
        sink.write_frame(&frame(0, 2)).unwrap();
        sink.write_frame(&frame(10, 3)).unwrap();
        assert!(matches!(sink.write_frame(&frame(20, 4)), Err(RunError::Storage { .. })));

        let bytes = sink.into_inner().inner.into_inner();
        let mut reader = TrajectoryReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.next_frame().unwrap(), Some(frame(0, 2)));
        assert_eq!(reader.next_frame().unwrap(), Some(frame(10, 3)));
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn finish_cuts_off_a_partial_frame() {
        let flaky = Flaky {
            inner: Cursor::new(Vec::new()),
            fail: 2..3,
            calls: 0,
        };
        let mut writer = TrajectoryWriter::new(flaky, &header()).unwrap();
        writer.write_frame(&frame(0, 2)).unwrap();
        assert!(writer.write_frame(&frame(10, 5)).is_err());
        writer.finish().unwrap();

        let bytes = writer.into_inner().inner.into_inner();
        let h = TrajectoryReader::new(Cursor::new(bytes.clone())).unwrap().header().clone();
        assert_eq!((h.min_particles, h.max_particles), (2, 2));
        assert_eq!(read_all(bytes), vec![frame(0, 2)]);
    }
}
