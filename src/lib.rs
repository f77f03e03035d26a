/* Tunneled FM-index
 * implemented:
 *  - construction from a text or a ready-made BWT
 *  - de Bruijn graph reduction and tunnel marking (module dbg)
 *  - backward-step navigation and inversion of the tunneled index
 *  - reading an index from pfwg .L/.din/.dout files
 *  - serialization of the whole index
 */

pub mod dbg;
pub mod error;

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use bio::data_structures::bwt::bwt as bwtransform;
use bio::data_structures::rank_select::RankSelect;
use bio::data_structures::suffix_array::suffix_array;
use bv::{BitVec, BitsMut};
use simple_sds_sbwt::bit_vector::BitVector;
use simple_sds_sbwt::ops::{BitVec as Bits, Rank, Select};
use simple_sds_sbwt::raw_vector::{AccessRaw, PushRaw, RawVector};
use simple_sds_sbwt::serialize::Serialize;

pub use crate::dbg::{DbgParams, DbgStats};
pub use crate::error::{Error, Result};

/* The last column of the (possibly tunneled) BWT. Symbols are kept as
 * plain bytes; rank support is one indicator bitvector per occurring
 * symbol, so absent symbols cost nothing.
 */
pub struct WaveletL {
    symbols: Vec<u8>,
    occ: Vec<Option<RankSelect>>,
}

impl WaveletL {
    pub fn new(symbols: Vec<u8>) -> WaveletL {
        let sigma = symbols.iter().map(|&s| s as usize + 1).max().unwrap_or(0);
        let mut present = vec![false; sigma];
        for &s in &symbols {
            present[s as usize] = true;
        }

        let mut occ = Vec::with_capacity(sigma);
        for sym in 0..sigma {
            if !present[sym] {
                occ.push(None);
                continue;
            }
            let mut bits: BitVec<u8> = BitVec::new_fill(false, symbols.len() as u64);
            for (i, &s) in symbols.iter().enumerate() {
                if s as usize == sym {
                    bits.set_bit(i as u64, true);
                }
            }
            occ.push(Some(RankSelect::new(bits, 1)));
        }

        WaveletL { symbols, occ }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /* One more than the largest occurring symbol. */
    pub fn sigma(&self) -> usize {
        self.occ.len()
    }

    pub fn access(&self, i: usize) -> u8 {
        self.symbols[i]
    }

    /* Occurrences of sym in positions [0, i). */
    pub fn rank(&self, sym: u8, i: usize) -> usize {
        if i == 0 {
            return 0;
        }
        match self.occ.get(sym as usize) {
            Some(Some(rs)) => rs.rank((i - 1) as u64).unwrap_or(0) as usize,
            _ => 0,
        }
    }

    /* (rank of L[i] before i, L[i]) in one step. */
    pub fn inverse_select(&self, i: usize) -> (usize, u8) {
        let sym = self.symbols[i];
        (self.rank(sym, i), sym)
    }

    /* C[sym] = number of positions holding a smaller symbol. */
    pub fn symbol_frequencies(&self) -> Vec<u64> {
        let mut c = vec![0u64; self.sigma() + 1];
        for &s in &self.symbols {
            c[s as usize + 1] += 1;
        }
        for sym in 0..self.sigma() {
            c[sym + 1] += c[sym];
        }
        c
    }
}

impl Serialize for WaveletL {
    fn serialize_header<T: io::Write>(&self, _: &mut T) -> io::Result<()> {
        Ok(())
    }

    fn serialize_body<T: io::Write>(&self, writer: &mut T) -> io::Result<()> {
        self.symbols.serialize(writer)
    }

    fn load<T: io::Read>(reader: &mut T) -> io::Result<Self> {
        let symbols = Vec::<u8>::load(reader)?;
        Ok(WaveletL::new(symbols))
    }

    fn size_in_elements(&self) -> usize {
        self.symbols.size_in_elements()
    }
}

/* A navigation position: the current row of L plus the deferred offset
 * that is recorded when a tunnel is entered and consumed at its exit.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NavPos {
    i: usize,
    o: usize,
}

/* The tunneled index itself. All fields are immutable once built; the
 * rank and select supports of dout and din live inside the bitvectors
 * and are re-enabled whenever one of them is rebuilt or reloaded.
 */
pub struct TfmIndex {
    text_len: usize,
    l: WaveletL,
    c: Vec<u64>,
    dout: BitVector,
    din: BitVector,
}

impl TfmIndex {
    /* Length of the original text, terminator included. */
    pub fn text_len(&self) -> usize {
        self.text_len
    }

    pub fn l(&self) -> &WaveletL {
        &self.l
    }

    pub fn c(&self) -> &[u64] {
        &self.c
    }

    pub fn dout(&self) -> &BitVector {
        &self.dout
    }

    pub fn din(&self) -> &BitVector {
        &self.din
    }

    /* The row of the terminator, where every traversal starts. */
    pub fn end(&self) -> NavPos {
        NavPos { i: 0, o: 0 }
    }

    /* The position reached after rewinding to the front of the text. */
    pub fn start(&self) -> NavPos {
        let mut pos = self.end();
        for _ in 1..self.text_len {
            self.backwardstep(&mut pos);
        }
        pos
    }

    pub fn preceding_char(&self, pos: &NavPos) -> u8 {
        self.l.access(pos.i)
    }

    /* Moves one character back in the text and returns that character.
     *
     * The step is the classical LF-mapping with two extra checks: landing
     * strictly inside an incoming-edge block records how far below the
     * top entry we are, and reaching a multi-exit block replays that
     * offset to pick the matching outgoing edge.
     */
    pub fn backwardstep(&self, pos: &mut NavPos) -> u8 {
        debug_assert!(pos.i < self.l.len());
        let (rank, sym) = self.l.inverse_select(pos.i);
        let mut i = self.c[sym as usize] as usize + rank;

        let k = self.din.rank(i + 1);
        if !self.din.get(i) {
            pos.o = i - self.din.select(k - 1).unwrap();
        }
        i = self.dout.select(k - 1).unwrap();
        if !self.dout.get(i + 1) {
            i += pos.o;
            pos.o = 0;
        }

        pos.i = i;
        sym
    }

    /* Reconstructs the text, terminator included. The walk emits the text
     * back to front and closes the cycle with the terminator itself.
     */
    pub fn untunnel(&self) -> Vec<u8> {
        let n = self.text_len;
        let mut text = vec![0u8; n];
        let mut pos = self.end();
        for step in 0..n.saturating_sub(1) {
            text[n - 2 - step] = self.backwardstep(&mut pos);
        }
        if n > 0 {
            text[n - 1] = self.backwardstep(&mut pos);
        }
        text
    }

    /* Builds the index from a text whose last byte is a unique terminator
     * smaller than every other symbol.
     */
    pub fn from_text(text: &[u8]) -> (TfmIndex, DbgStats) {
        let sa = suffix_array(text);
        let bwt = bwtransform(text, &sa);
        Self::from_bwt(&bwt, &DbgParams::default())
    }

    /* Builds the index from a ready-made BWT: reduce the de Bruijn graph,
     * mark the prefix intervals, drop the redundant rows, reassemble.
     */
    pub fn from_bwt(bwt: &[u8], params: &DbgParams) -> (TfmIndex, DbgStats) {
        let text_len = bwt.len();
        let full = WaveletL::new(bwt.to_vec());
        let c = full.symbol_frequencies();

        let (stats, b) = dbg::find_min_dbg(&full, &c, params);
        let (dout, din) = dbg::mark_prefix_intervals(&full, &c, &b);
        let (l, dout, din) = compact(&full, &dout, &din);
        log::info!(
            "order {} graph with {} nodes keeps {} of {} rows",
            stats.k,
            stats.nodes,
            l.len(),
            text_len
        );

        (Self::assemble(text_len, l, dout, din), stats)
    }

    /* Loads an index prepared by the prefix-free-parsing generator:
     * basename gives the original size, basename.L the tunneled last
     * column and basename.din/.dout the packed edge bitvectors.
     */
    pub fn load_pfwg<P: AsRef<Path>>(basename: P) -> Result<TfmIndex> {
        let basename = basename.as_ref();
        let text_len = std::fs::metadata(basename)?.len() as usize + 1;

        let mut symbols = Vec::new();
        File::open(side_file(basename, "L"))?.read_to_end(&mut symbols)?;
        let m = symbols.len();

        let din = packed_bits_from_file(&side_file(basename, "din"), m + 1)?;
        let dout = packed_bits_from_file(&side_file(basename, "dout"), m + 1)?;

        let l = WaveletL::new(symbols);
        let c = l.symbol_frequencies();
        let index = TfmIndex {
            text_len,
            l,
            c,
            dout: enable_supports(BitVector::from(dout)),
            din: enable_supports(BitVector::from(din)),
        };
        index.validate()?;
        Ok(index)
    }

    fn assemble(text_len: usize, symbols: Vec<u8>, dout: RawVector, din: RawVector) -> TfmIndex {
        let l = WaveletL::new(symbols);
        let c = l.symbol_frequencies();
        let dout = enable_supports(BitVector::from(dout));
        let din = enable_supports(BitVector::from(din));
        debug_assert_eq!(dout.count_ones(), din.count_ones());

        TfmIndex { text_len, l, c, dout, din }
    }

    /* Structural checks shared by every load path. */
    fn validate(&self) -> Result<()> {
        let m = self.l.len();
        for bits in [&self.dout, &self.din] {
            if bits.len() != m + 1 {
                return Err(Error::DimensionMismatch { expected: m + 1, found: bits.len() });
            }
            if !bits.get(m) {
                return Err(Error::MissingSentinel);
            }
        }
        let dout_ones = self.dout.count_ones();
        let din_ones = self.din.count_ones();
        if dout_ones != din_ones {
            return Err(Error::TunnelImbalance { dout: dout_ones, din: din_ones });
        }
        Ok(())
    }
}

impl Serialize for TfmIndex {
    fn serialize_header<T: io::Write>(&self, _: &mut T) -> io::Result<()> {
        Ok(())
    }

    fn serialize_body<T: io::Write>(&self, writer: &mut T) -> io::Result<()> {
        self.text_len.serialize(writer)?;
        self.l.serialize(writer)?;
        self.c.serialize(writer)?;
        self.dout.serialize(writer)?;
        self.din.serialize(writer)?;
        Ok(())
    }

    fn load<T: io::Read>(reader: &mut T) -> io::Result<Self> {
        let text_len = usize::load(reader)?;
        let l = WaveletL::load(reader)?;
        let c = Vec::<u64>::load(reader)?;
        let dout = enable_supports(BitVector::load(reader)?);
        let din = enable_supports(BitVector::load(reader)?);

        let index = TfmIndex { text_len, l, c, dout, din };
        index
            .validate()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        Ok(index)
    }

    fn size_in_elements(&self) -> usize {
        self.text_len.size_in_elements()
            + self.l.size_in_elements()
            + self.c.size_in_elements()
            + self.dout.size_in_elements()
            + self.din.size_in_elements()
    }
}

/* Removes the rows made redundant by the tunnel marking. Rows that keep
 * their din bit keep their symbol and contribute the next dout bit; rows
 * that keep their dout bit contribute the next din bit. Both outputs end
 * with a fresh sentinel and come out equally long.
 */
fn compact(full: &WaveletL, dout: &RawVector, din: &RawVector) -> (Vec<u8>, RawVector, RawVector) {
    let mut symbols = Vec::new();
    let mut new_dout = RawVector::new();
    let mut new_din = RawVector::new();

    for i in 0..full.len() {
        if din.bit(i) {
            symbols.push(full.access(i));
            new_dout.push_bit(dout.bit(i));
        }
        if dout.bit(i) {
            new_din.push_bit(din.bit(i));
        }
    }
    new_dout.push_bit(true);
    new_din.push_bit(true);
    debug_assert_eq!(new_dout.len(), new_din.len());

    (symbols, new_dout, new_din)
}

fn enable_supports(mut bits: BitVector) -> BitVector {
    bits.enable_rank();
    bits.enable_select();
    bits
}

fn side_file(basename: &Path, suffix: &str) -> PathBuf {
    let mut name = basename.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/* Reads a packed bitvector of exactly len bits, most significant bit of
 * each byte first; trailing bits of the last byte are ignored.
 */
fn packed_bits_from_file(path: &Path, len: usize) -> Result<RawVector> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    let expected = (len + 7) / 8;
    if bytes.len() < expected {
        return Err(Error::DimensionMismatch { expected, found: bytes.len() });
    }

    let mut bits = RawVector::with_len(len, false);
    for i in 0..len {
        if bytes[i / 8] & (0x80 >> (i % 8)) != 0 {
            bits.set_bit(i, true);
        }
    }
    Ok(bits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;

    fn raw_from_bools(bits: &[bool]) -> RawVector {
        let mut raw = RawVector::with_len(bits.len(), false);
        for (i, &b) in bits.iter().enumerate() {
            if b {
                raw.set_bit(i, true);
            }
        }
        raw
    }

    fn from_parts(text_len: usize, symbols: &[u8], dout: &[bool], din: &[bool]) -> TfmIndex {
        TfmIndex::assemble(
            text_len,
            symbols.to_vec(),
            raw_from_bools(dout),
            raw_from_bools(din),
        )
    }

    #[test]
    fn plain_lf_walk_without_tunnels() {
        let text = [1u8, 2, 3, 4, 5, 0];
        let (tfm, _) = TfmIndex::from_text(&text);
        assert_eq!(tfm.l().len(), text.len());
        assert_eq!(tfm.dout().count_ones(), text.len() + 1);
        assert_eq!(tfm.din().count_ones(), text.len() + 1);
        assert_eq!(tfm.untunnel(), text);
    }

    #[test]
    #[rustfmt::skip]
    fn untunnel_replays_a_hand_built_tunnel() {
        // One tunnel of height two: the collapsed rows of [1,2,3,4,2,3,4,5,0].
        let tfm = from_parts(
            9,
            &[5, 0, 1, 4, 2, 3, 4],
            &[true, true, true, false, true, true, true, true],
            &[true, true, true, true, true, false, true, true],
        );
        assert_eq!(tfm.untunnel(), [1, 2, 3, 4, 2, 3, 4, 5, 0]);
    }

    #[test]
    fn backwardstep_records_and_consumes_the_offset() {
        let tfm = from_parts(
            9,
            &[5, 0, 1, 4, 2, 3, 4],
            &[true, true, true, false, true, true, true, true],
            &[true, true, true, true, true, false, true, true],
        );
        let mut pos = tfm.end();
        assert_eq!(tfm.preceding_char(&pos), 5);

        for expected in [5, 4, 3, 2] {
            assert_eq!(tfm.backwardstep(&mut pos), expected);
        }
        // Past the first pass through the tunnel, the offset is spent.
        assert_eq!(pos.o, 0);
        for expected in [4, 3, 2, 1, 0] {
            assert_eq!(tfm.backwardstep(&mut pos), expected);
        }
        assert_eq!(pos, tfm.end());
    }

    #[test]
    fn banana_is_tunneled_and_inverts() {
        let text = b"banana$".to_vec();
        let (tfm, stats) = TfmIndex::from_text(&text);
        assert_eq!(stats.k, 1);
        assert_eq!(tfm.l().len(), 6);
        assert_eq!(tfm.untunnel(), text);
    }

    #[test]
    fn periodic_text_shrinks_but_still_inverts() {
        let text = b"abcabcabcabc$".to_vec();
        let (tfm, _) = TfmIndex::from_text(&text);
        assert_eq!(tfm.l().len(), 7);
        assert_eq!(tfm.untunnel(), text);
    }

    #[test]
    fn character_runs_invert_untunneled() {
        let mut text = vec![b'a'; 8];
        text.push(0);
        let (tfm, _) = TfmIndex::from_text(&text);
        assert_eq!(tfm.l().len(), text.len());
        assert_eq!(tfm.untunnel(), text);
    }

    #[test]
    fn mississippi_round_trip() {
        let text = b"mississippi$".to_vec();
        let (tfm, _) = TfmIndex::from_text(&text);
        assert!(tfm.l().len() < text.len());
        assert_eq!(tfm.dout().count_ones(), tfm.din().count_ones());
        assert_eq!(tfm.untunnel(), text);
    }

    #[test]
    fn terminator_only_text() {
        let (tfm, _) = TfmIndex::from_text(&[0]);
        assert_eq!(tfm.text_len(), 1);
        assert_eq!(tfm.untunnel(), [0]);
        let mut pos = tfm.end();
        assert_eq!(tfm.backwardstep(&mut pos), 0);
        assert_eq!(pos, tfm.end());
    }

    #[test]
    fn start_is_the_front_of_the_text() {
        let (tfm, _) = TfmIndex::from_text(b"banana$");
        let mut pos = tfm.start();
        // One more step wraps around and yields the terminator.
        assert_eq!(tfm.backwardstep(&mut pos), b'$');
        assert_eq!(pos, tfm.end());
    }

    #[test]
    fn serialization_round_trips_and_is_stable() {
        let (tfm, _) = TfmIndex::from_text(b"mississippi$");

        let mut buf = Vec::new();
        tfm.serialize(&mut buf).unwrap();
        assert_eq!(buf.len(), tfm.size_in_bytes());

        let loaded = TfmIndex::load(&mut io::Cursor::new(&buf)).unwrap();
        assert_eq!(loaded.text_len(), tfm.text_len());
        assert_eq!(loaded.untunnel(), tfm.untunnel());

        let mut again = Vec::new();
        loaded.serialize(&mut again).unwrap();
        assert_eq!(buf, again);
    }

    #[test]
    fn truncated_serialization_is_rejected() {
        let (tfm, _) = TfmIndex::from_text(b"banana$");
        let mut buf = Vec::new();
        tfm.serialize(&mut buf).unwrap();
        buf.truncate(buf.len() / 2);
        assert!(TfmIndex::load(&mut io::Cursor::new(&buf)).is_err());
    }

    fn pack_msb_first(bits: &BitVector) -> Vec<u8> {
        let mut bytes = vec![0u8; (bits.len() + 7) / 8];
        for i in 0..bits.len() {
            if bits.get(i) {
                bytes[i / 8] |= 0x80 >> (i % 8);
            }
        }
        bytes
    }

    fn write_pfwg_files(dir: &Path, name: &str, text: &[u8], tfm: &TfmIndex) -> PathBuf {
        let base = dir.join(name);
        // The base file holds the raw text without the terminator.
        std::fs::write(&base, &text[..text.len() - 1]).unwrap();
        std::fs::write(side_file(&base, "L"), tfm.l().symbols.as_slice()).unwrap();
        std::fs::write(side_file(&base, "din"), pack_msb_first(tfm.din())).unwrap();
        std::fs::write(side_file(&base, "dout"), pack_msb_first(tfm.dout())).unwrap();
        base
    }

    #[test]
    fn pfwg_files_load_into_an_equivalent_index() {
        let text = b"banana$".to_vec();
        let (tfm, _) = TfmIndex::from_text(&text);

        let dir = tempfile::tempdir().unwrap();
        let base = write_pfwg_files(dir.path(), "banana", &text, &tfm);

        let loaded = TfmIndex::load_pfwg(&base).unwrap();
        assert_eq!(loaded.text_len(), tfm.text_len());
        assert_eq!(loaded.untunnel(), text);
    }

    #[test]
    fn pfwg_rejects_short_side_files() {
        let text = b"banana$".to_vec();
        let (tfm, _) = TfmIndex::from_text(&text);

        let dir = tempfile::tempdir().unwrap();
        let base = write_pfwg_files(dir.path(), "banana", &text, &tfm);
        let mut f = std::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(side_file(&base, "din"))
            .unwrap();
        f.write_all(&[]).unwrap();
        drop(f);

        assert!(matches!(
            TfmIndex::load_pfwg(&base),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    proptest! {
        #[test]
        fn random_small_alphabet_texts_invert(body in proptest::collection::vec(1u8..=4, 1..300)) {
            let mut text = body;
            text.push(0);
            let (tfm, _) = TfmIndex::from_text(&text);
            prop_assert_eq!(tfm.dout().count_ones(), tfm.din().count_ones());
            prop_assert_eq!(tfm.untunnel(), text);
        }

        #[test]
        fn random_wider_alphabet_texts_survive_a_reload(body in proptest::collection::vec(1u8..=8, 1..200)) {
            let mut text = body;
            text.push(0);
            let (tfm, _) = TfmIndex::from_text(&text);

            let mut buf = Vec::new();
            tfm.serialize(&mut buf).unwrap();
            let loaded = TfmIndex::load(&mut io::Cursor::new(&buf)).unwrap();
            prop_assert_eq!(loaded.untunnel(), text);
        }
    }
}
