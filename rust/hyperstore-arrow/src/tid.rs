//! Row identifiers and the compressed row identifier codec.
//!
//! A row identifier addresses a physical row as `(page, slot)`. Rows read out of a
//! compressed record additionally need the index of the logical row inside that
//! record. The codec folds the record's identifier and the 1-based tuple index
//! into a single identifier of the same shape, so that consumers of row
//! identifiers (bitmaps, page-oriented clients) can handle both kinds uniformly.
//!
//! The packed value is split into a page number and a slot number using the page
//! capacity `P`, so the resulting slot number always stays within `1..=P`, and the
//! top bit of the page number is reserved as the "compressed" flag.

use std::{fmt, str::FromStr};

use hyperstore_common::{Result, error::Error, verify_arg};

/// Maximum number of row slots on a single page of the row store.
pub const MAX_TUPLES_PER_PAGE: u16 = 291;

/// Page number bit that marks a row identifier as compressed.
pub const COMPRESSED_FLAG: u32 = 1 << 31;

/// Number of low bits of the packed value that hold the tuple index.
pub const TUPLE_INDEX_BITS: u32 = 10;

pub const TUPLE_INDEX_MASK: u64 = (1u64 << TUPLE_INDEX_BITS) - 1;

/// The largest tuple index (and thus the largest number of logical rows) that
/// can be addressed inside a single compressed record.
pub const MAX_TUPLE_INDEX: u16 = TUPLE_INDEX_MASK as u16;

/// Tuple index of a row that does not come from a compressed record.
pub const INVALID_TUPLE_INDEX: u16 = 0;

/// Physical row address: page number and 1-based slot number within the page.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowId {
    /// Page containing the row.
    pub page: u32,
    /// Slot within the page.
    pub slot: u16,
}

impl RowId {
    pub const fn new(page: u32, slot: u16) -> RowId {
        RowId { page, slot }
    }

    /// Returns `true` if the slot number is set (slot numbers are 1-based).
    pub fn is_valid(&self) -> bool {
        self.slot != 0
    }

    /// Returns `true` if the page number carries the compressed flag.
    pub fn is_compressed(&self) -> bool {
        self.page & COMPRESSED_FLAG != 0
    }

    /// Linearizes the row identifier into a single integer, `(page << 16) | slot`.
    pub fn linear_encode(&self) -> u64 {
        ((self.page as u64) << 16) | self.slot as u64
    }

    /// Inverse of [`RowId::linear_encode`].
    pub fn from_linear(value: u64) -> RowId {
        RowId {
            page: (value >> 16) as u32,
            slot: (value & 0xFFFF) as u16,
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.page, self.slot)
    }
}

impl FromStr for RowId {
    type Err = Error;

    /// Parses `(page,slot)` or `page,slot`.
    fn from_str(s: &str) -> Result<RowId> {
        let trimmed = s.trim();
        let inner = trimmed
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .unwrap_or(trimmed);
        let (page, slot) = inner
            .split_once(',')
            .ok_or_else(|| Error::invalid_arg("row_id", format!("expected (page,slot): {s}")))?;
        let page = page
            .trim()
            .parse::<u32>()
            .map_err(|e| Error::invalid_arg("row_id", format!("page number: {e}")))?;
        let slot = slot
            .trim()
            .parse::<u16>()
            .map_err(|e| Error::invalid_arg("row_id", format!("slot number: {e}")))?;
        Ok(RowId::new(page, slot))
    }
}

/// Converts between real row identifiers and compressed row identifiers for a
/// given page capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TidCodec {
    tuples_per_page: u16,
}

impl TidCodec {
    /// Creates a codec for pages holding at most `tuples_per_page` rows.
    ///
    /// # Panics
    /// Panics if `tuples_per_page` is zero.
    pub const fn new(tuples_per_page: u16) -> TidCodec {
        assert!(tuples_per_page != 0);
        TidCodec { tuples_per_page }
    }

    pub fn tuples_per_page(&self) -> u16 {
        self.tuples_per_page
    }

    /// Returns the largest real page number for which every slot in `1..=P` and
    /// every tuple index can be encoded without the packed page number reaching
    /// the compressed flag bit.
    pub fn max_encodable_page(&self) -> u32 {
        let p = self.tuples_per_page as u64;
        let limit = p << 31;
        let tail = (p << TUPLE_INDEX_BITS) | TUPLE_INDEX_MASK;
        ((limit - 1 - tail) >> (16 + TUPLE_INDEX_BITS)) as u32
    }

    /// Encodes the real row identifier of a compressed record and the 1-based
    /// index of a logical row inside it into a compressed row identifier.
    ///
    /// # Errors
    /// Returns an error if `tuple_index` is outside `1..=MAX_TUPLE_INDEX`, if
    /// `real` is already compressed or has a zero slot, or if the packed page
    /// number would collide with the compressed flag.
    pub fn encode(&self, real: RowId, tuple_index: u16) -> Result<RowId> {
        verify_arg!(
            tuple_index,
            tuple_index != INVALID_TUPLE_INDEX && tuple_index <= MAX_TUPLE_INDEX
        );
        verify_arg!(real, !real.is_compressed() && real.is_valid());

        let p = self.tuples_per_page as u64;
        let packed = (real.linear_encode() << TUPLE_INDEX_BITS) | tuple_index as u64;
        let page = packed / p;
        if page >= COMPRESSED_FLAG as u64 {
            return Err(Error::invalid_arg(
                "real",
                format!("page number {} is out of the compressed encoding range", real.page),
            ));
        }
        let slot = (packed % p) as u16 + 1;
        debug_assert!(slot >= 1 && slot <= self.tuples_per_page);
        Ok(RowId::new(COMPRESSED_FLAG | page as u32, slot))
    }

    /// Decodes a compressed row identifier into the real row identifier of the
    /// compressed record and the 1-based tuple index.
    ///
    /// # Errors
    /// Returns an error if `ctid` does not carry the compressed flag, if its slot
    /// is outside `1..=P`, or if it does not decode to a valid tuple index.
    pub fn decode(&self, ctid: RowId) -> Result<(RowId, u16)> {
        verify_arg!(ctid, ctid.is_compressed());
        verify_arg!(ctid, ctid.slot >= 1 && ctid.slot <= self.tuples_per_page);

        let p = self.tuples_per_page as u64;
        let packed = p * (ctid.page & !COMPRESSED_FLAG) as u64 + (ctid.slot - 1) as u64;
        let real = RowId::from_linear(packed >> TUPLE_INDEX_BITS);
        let tuple_index = (packed & TUPLE_INDEX_MASK) as u16;
        verify_arg!(ctid, tuple_index != INVALID_TUPLE_INDEX);
        Ok((real, tuple_index))
    }

    /// Moves a row identifier forward by `increment` slots, carrying into the page
    /// number whenever the slot number would exceed the page capacity.
    ///
    /// # Errors
    /// Returns an error if `tid` has a zero slot, or if the page number would
    /// overflow. A plain identifier never carries into the compressed flag.
    pub fn advance_by(&self, tid: RowId, increment: u32) -> Result<RowId> {
        verify_arg!(tid, tid.is_valid());

        let p = self.tuples_per_page as u64;
        let slot = tid.slot as u64;
        let increment = increment as u64;
        let (page, slot) = if slot + increment <= p {
            (tid.page as u64, slot + increment)
        } else {
            let relative = slot - 1 + increment;
            (tid.page as u64 + relative / p, relative % p + 1)
        };

        let page_limit = if tid.is_compressed() {
            u32::MAX as u64
        } else {
            COMPRESSED_FLAG as u64 - 1
        };
        if page > page_limit {
            return Err(Error::invalid_arg(
                "increment",
                format!("advancing {tid} by {increment} overflows the page number"),
            ));
        }
        Ok(RowId::new(page as u32, slot as u16))
    }
}

impl Default for TidCodec {
    fn default() -> Self {
        TidCodec::new(MAX_TUPLES_PER_PAGE)
    }
}

/// Encodes with the default page capacity, see [`TidCodec::encode`].
pub fn encode(real: RowId, tuple_index: u16) -> Result<RowId> {
    TidCodec::default().encode(real, tuple_index)
}

/// Decodes with the default page capacity, see [`TidCodec::decode`].
pub fn decode(ctid: RowId) -> Result<(RowId, u16)> {
    TidCodec::default().decode(ctid)
}

/// Advances with the default page capacity, see [`TidCodec::advance_by`].
pub fn advance_by(tid: RowId, increment: u32) -> Result<RowId> {
    TidCodec::default().advance_by(tid, increment)
}

pub fn is_compressed(tid: RowId) -> bool {
    tid.is_compressed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_real(codec: &TidCodec) -> RowId {
        let page = fastrand::u32(0..=codec.max_encodable_page());
        let slot = fastrand::u16(1..=codec.tuples_per_page());
        RowId::new(page, slot)
    }

    #[test]
    fn test_encode_decode_scenario() {
        let codec = TidCodec::new(20);
        let real = RowId::new(5, 3);
        let ctid = codec.encode(real, 7).unwrap();
        assert!(ctid.is_compressed());
        assert!(ctid.slot >= 1 && ctid.slot <= 20);
        assert_eq!(codec.decode(ctid).unwrap(), (real, 7));
    }

    #[test]
    fn test_round_trip_random() {
        fastrand::seed(84512397);
        for codec in [TidCodec::new(20), TidCodec::default(), TidCodec::new(1)] {
            for _ in 0..10000 {
                let real = random_real(&codec);
                let tuple_index = fastrand::u16(1..=MAX_TUPLE_INDEX);
                let ctid = codec.encode(real, tuple_index).unwrap();
                assert!(ctid.is_compressed());
                assert!(ctid.slot >= 1 && ctid.slot <= codec.tuples_per_page());
                assert_eq!(codec.decode(ctid).unwrap(), (real, tuple_index));
            }
        }
    }

    #[test]
    fn test_round_trip_extremes() {
        let codec = TidCodec::default();
        let max_page = codec.max_encodable_page();
        for real in [
            RowId::new(0, 1),
            RowId::new(0, MAX_TUPLES_PER_PAGE),
            RowId::new(max_page, 1),
            RowId::new(max_page, MAX_TUPLES_PER_PAGE),
        ] {
            for tuple_index in [1, 2, MAX_TUPLE_INDEX - 1, MAX_TUPLE_INDEX] {
                let ctid = codec.encode(real, tuple_index).unwrap();
                assert_eq!(codec.decode(ctid).unwrap(), (real, tuple_index));
            }
        }
    }

    #[test]
    fn test_plain_ids_are_not_compressed() {
        assert!(!is_compressed(RowId::new(0, 1)));
        assert!(!is_compressed(RowId::new(COMPRESSED_FLAG - 1, 291)));
        assert!(is_compressed(RowId::new(COMPRESSED_FLAG, 1)));
        assert!(decode(RowId::new(17, 4)).is_err());
    }

    #[test]
    fn test_page_boundaries() {
        // Row (0,1) linearizes to 1, so the packed value is 1024 + tuple_index.
        // 1024 % 20 == 4: tuple indexes 15, 16 and 17 land on P-1, P and P+1.
        let codec = TidCodec::new(20);
        let real = RowId::new(0, 1);

        let before = codec.encode(real, 15).unwrap();
        assert_eq!(before, RowId::new(COMPRESSED_FLAG | 51, 20));

        let at = codec.encode(real, 16).unwrap();
        assert_eq!(at, RowId::new(COMPRESSED_FLAG | 52, 1));

        let after = codec.encode(real, 17).unwrap();
        assert_eq!(after, RowId::new(COMPRESSED_FLAG | 52, 2));

        for (ctid, tuple_index) in [(before, 15), (at, 16), (after, 17)] {
            assert_ne!(ctid.slot, 0);
            assert_eq!(codec.decode(ctid).unwrap(), (real, tuple_index));
        }
    }

    #[test]
    fn test_linear_page_boundaries() {
        let codec = TidCodec::new(20);
        // Real identifiers whose linearized value is P-1, 0 and 1 modulo P:
        // 65536 % 20 == 16 and 7 * 65536 % 20 == 12.
        let reals = [
            (RowId::new(0, 19), 19),
            (RowId::new(0, 20), 0),
            (RowId::new(0, 21), 1),
            (RowId::new(1, 3), 19),
            (RowId::new(1, 4), 0),
            (RowId::new(1, 5), 1),
            (RowId::new(7, 7), 19),
            (RowId::new(7, 8), 0),
            (RowId::new(7, 9), 1),
        ];
        for (real, residue) in reals {
            assert_eq!(real.linear_encode() % 20, residue);
            for tuple_index in 1..=MAX_TUPLE_INDEX {
                let ctid = codec.encode(real, tuple_index).unwrap();
                assert!((1..=20).contains(&ctid.slot));
                assert_eq!(codec.decode(ctid).unwrap(), (real, tuple_index));
            }
        }

        // Linear value 20 packs to 20480 + tuple_index, a multiple of P at 20.
        let real = RowId::new(0, 20);
        assert_eq!(
            codec.encode(real, 19).unwrap(),
            RowId::new(COMPRESSED_FLAG | 1024, 20)
        );
        assert_eq!(
            codec.encode(real, 20).unwrap(),
            RowId::new(COMPRESSED_FLAG | 1025, 1)
        );
        assert_eq!(
            codec.encode(real, 21).unwrap(),
            RowId::new(COMPRESSED_FLAG | 1025, 2)
        );
    }

    #[test]
    fn test_encode_rejects_invalid_input() {
        let codec = TidCodec::new(20);
        let real = RowId::new(5, 3);
        assert!(codec.encode(real, INVALID_TUPLE_INDEX).is_err());
        assert!(codec.encode(real, MAX_TUPLE_INDEX + 1).is_err());
        assert!(codec.encode(RowId::new(5, 0), 1).is_err());
        assert!(codec.encode(RowId::new(COMPRESSED_FLAG | 5, 3), 1).is_err());

        let max_page = codec.max_encodable_page();
        assert_eq!(max_page, 639);
        assert!(codec.encode(RowId::new(max_page, 20), MAX_TUPLE_INDEX).is_ok());
        assert!(codec.encode(RowId::new(max_page + 1, 1), 1).is_err());
    }

    #[test]
    fn test_decode_rejects_invalid_input() {
        let codec = TidCodec::new(20);
        assert!(codec.decode(RowId::new(COMPRESSED_FLAG | 3, 0)).is_err());
        assert!(codec.decode(RowId::new(COMPRESSED_FLAG | 3, 21)).is_err());
        // Packed value 0 decodes to tuple index 0.
        assert!(codec.decode(RowId::new(COMPRESSED_FLAG, 1)).is_err());
    }

    #[test]
    fn test_advance_matches_next_tuple_index() {
        fastrand::seed(1290455);
        let codec = TidCodec::new(20);
        for _ in 0..2000 {
            let real = random_real(&codec);
            let tuple_index = fastrand::u16(1..MAX_TUPLE_INDEX);
            let step = fastrand::u16(1..=MAX_TUPLE_INDEX - tuple_index);
            let ctid = codec.encode(real, tuple_index).unwrap();
            let advanced = codec.advance_by(ctid, step as u32).unwrap();
            assert_eq!(advanced, codec.encode(real, tuple_index + step).unwrap());
        }
    }

    #[test]
    fn test_advance_associativity() {
        fastrand::seed(5501);
        for codec in [TidCodec::new(20), TidCodec::default()] {
            for _ in 0..1000 {
                let tid = RowId::new(
                    fastrand::u32(0..1_000_000),
                    fastrand::u16(1..=codec.tuples_per_page()),
                );
                let a = fastrand::u32(0..5000);
                let b = fastrand::u32(0..5000);
                let advance = |t, n| codec.advance_by(t, n).unwrap();
                assert_eq!(advance(advance(tid, a), b), advance(tid, a + b));
                let stepped = (0..a).fold(tid, |t, _| advance(t, 1));
                assert_eq!(stepped, advance(tid, a));
            }
        }
    }

    #[test]
    fn test_advance_carry() {
        let codec = TidCodec::new(20);
        let advance = |t, n| codec.advance_by(t, n).unwrap();
        assert_eq!(advance(RowId::new(3, 19), 1), RowId::new(3, 20));
        assert_eq!(advance(RowId::new(3, 20), 1), RowId::new(4, 1));
        assert_eq!(advance(RowId::new(3, 5), 40), RowId::new(5, 5));
        assert_eq!(advance(RowId::new(3, 5), 0), RowId::new(3, 5));
    }

    #[test]
    fn test_advance_rejects_overflow() {
        let codec = TidCodec::new(20);
        assert!(codec.advance_by(RowId::new(3, 0), 25).is_err());

        // Large increments carry without overflowing the slot arithmetic:
        // 1 + u32::MAX == 2^32 == 214748364 * 20 + 16.
        assert_eq!(
            codec.advance_by(RowId::new(1, 2), u32::MAX).unwrap(),
            RowId::new(1 + 214_748_364, 17)
        );

        // A plain identifier must not carry into the compressed flag.
        let last_plain = COMPRESSED_FLAG - 1;
        assert!(codec.advance_by(RowId::new(last_plain, 20), 1).is_err());
        assert_eq!(
            codec.advance_by(RowId::new(last_plain, 19), 1).unwrap(),
            RowId::new(last_plain, 20)
        );

        // A compressed identifier must not wrap around the page number.
        assert!(codec.advance_by(RowId::new(u32::MAX, 20), 1).is_err());
        assert!(advance_by(RowId::new(1, 2), u32::MAX).is_ok());
    }

    #[test]
    fn test_parse_and_display() {
        let tid: RowId = "(5,3)".parse().unwrap();
        assert_eq!(tid, RowId::new(5, 3));
        assert_eq!(tid.to_string(), "(5,3)");
        assert_eq!(" 7 , 2 ".parse::<RowId>().unwrap(), RowId::new(7, 2));
        assert!("(5;3)".parse::<RowId>().is_err());
        assert!("(x,3)".parse::<RowId>().is_err());
    }

    #[test]
    fn test_linearization() {
        let tid = RowId::new(0xABCD, 0x12);
        assert_eq!(tid.linear_encode(), 0xABCD_0012);
        assert_eq!(RowId::from_linear(tid.linear_encode()), tid);
    }
}
