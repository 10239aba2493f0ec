// WSJT-X UDP Wire Codec
// Reference: NetworkMessage.hpp from WSJT-X source, QDataStream (Qt_5_4) encoding
//
// Every packet starts with an 8 byte header (magic + schema) followed by
// big-endian Qt primitives. There is no self-describing schema: the field
// order is fixed per packet type.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Timelike, Utc};

use crate::error::PacketError;

/// WSJT-X Magic Number
pub const WSJTX_MAGIC: u32 = 0xadbccbda;

/// Size of the magic + schema header
pub const HEADER_LEN: usize = 8;

/// Qt date-time spec byte
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeSpec {
    /// 0 - local time of the sending machine (treated as UTC here)
    Local,
    /// 1 - UTC
    Utc,
    /// 2 - fixed offset from UTC in seconds
    OffsetFromUtc(i32),
    /// 3 - named time zone (IANA id follows on the wire)
    TimeZone(String),
}

/// Serialized QDateTime: Julian day + milliseconds since midnight + spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QDateTime {
    pub julian_day: i64,
    pub millis: u32,
    pub spec: TimeSpec,
}

impl QDateTime {
    /// Build a UTC date-time from a chrono timestamp
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        let naive = dt.naive_utc();
        let time = naive.time();
        let millis = time.num_seconds_from_midnight() * 1000 + time.nanosecond() / 1_000_000;
        Self {
            julian_day: date_to_julian_day(naive.date()),
            millis,
            spec: TimeSpec::Utc,
        }
    }

    /// Convert back to a UTC timestamp, applying the offset for `OffsetFromUtc`.
    /// `None` when the value is outside chrono's range.
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        let date = julian_day_to_date(self.julian_day)?;
        let secs = self.millis / 1000;
        let nanos = (self.millis % 1000) * 1_000_000;
        let time = NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)?;
        let mut naive = date.and_time(time);
        if let TimeSpec::OffsetFromUtc(offset) = self.spec {
            naive = naive.checked_sub_signed(Duration::seconds(offset as i64))?;
        }
        Some(naive.and_utc())
    }
}

/// Serialized QColor
///
/// On the wire each 8-bit channel is written as a 16-bit value with the byte
/// repeated (0xAB -> 0xABAB), followed by two zero padding bytes. WSJT-X
/// relies on that exact layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QColor {
    pub spec: u8,
    pub alpha: u8,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl QColor {
    pub const SPEC_INVALID: u8 = 0;
    pub const SPEC_RGB: u8 = 1;

    pub fn rgb(red: u8, green: u8, blue: u8) -> Self {
        Self { spec: Self::SPEC_RGB, alpha: 0xff, red, green, blue }
    }

    /// An invalid color; WSJT-X uses it to clear a highlight
    pub fn invalid() -> Self {
        Self { spec: Self::SPEC_INVALID, alpha: 0xff, red: 0, green: 0, blue: 0 }
    }

    pub fn is_valid(&self) -> bool {
        self.spec != Self::SPEC_INVALID
    }
}

// ============================================================================
// Julian day conversions (Meeus, Astronomical Algorithms ch. 7)
// ============================================================================

/// First Julian day of the Gregorian calendar (1582-10-15)
const GREGORIAN_START_JD: i64 = 2_299_161;

/// Convert a Qt Julian day number to a calendar date.
/// Days before 1582-10-15 use the Julian calendar, as Qt does.
pub fn julian_day_to_date(jd: i64) -> Option<NaiveDate> {
    let z = jd as f64;
    let a = if jd < GREGORIAN_START_JD {
        z
    } else {
        let alpha = ((z - 1_867_216.25) / 36_524.25).floor();
        z + 1.0 + alpha - (alpha / 4.0).floor()
    };
    let b = a + 1524.0;
    let c = ((b - 122.1) / 365.25).floor();
    let d = (365.25 * c).floor();
    let e = ((b - d) / 30.6001).floor();

    let day = (b - d - (30.6001 * e).floor()) as u32;
    let month = (if e < 14.0 { e - 1.0 } else { e - 13.0 }) as u32;
    let year = (if month > 2 { c - 4716.0 } else { c - 4715.0 }) as i32;

    NaiveDate::from_ymd_opt(year, month, day)
}

/// Convert a calendar date to a Qt Julian day number
pub fn date_to_julian_day(date: NaiveDate) -> i64 {
    use chrono::Datelike;

    let (mut y, mut m) = (date.year() as f64, date.month() as f64);
    let d = date.day() as f64;
    if m <= 2.0 {
        y -= 1.0;
        m += 12.0;
    }
    let gregorian = (date.year(), date.month(), date.day()) >= (1582, 10, 15);
    let b = if gregorian {
        let a = (y / 100.0).floor();
        2.0 - a + (a / 4.0).floor()
    } else {
        0.0
    };
    // Meeus gives JD at 0h (x.5); Qt numbers the day by its noon
    let jd = (365.25 * (y + 4716.0)).floor() + (30.6001 * (m + 1.0)).floor() + d + b - 1524.5;
    (jd + 0.5) as i64
}

// ============================================================================
// Reader
// ============================================================================

/// Bounds-checked cursor over a received datagram
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], PacketError> {
        if self.remaining() < n {
            return Err(PacketError::Truncated { needed: n, remaining: self.remaining() });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], PacketError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Read the magic number and schema version
    pub fn read_header(&mut self) -> Result<(u32, i32), PacketError> {
        let magic = self.read_u32()?;
        let schema = self.read_i32()?;
        Ok((magic, schema))
    }

    pub fn read_u8(&mut self) -> Result<u8, PacketError> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, PacketError> {
        Ok(i8::from_be_bytes(self.take_array()?))
    }

    pub fn read_bool(&mut self) -> Result<bool, PacketError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, PacketError> {
        Ok(u16::from_be_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, PacketError> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, PacketError> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, PacketError> {
        Ok(u64::from_be_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, PacketError> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, PacketError> {
        Ok(f64::from_be_bytes(self.take_array()?))
    }

    /// Read a Qt string. `None` when the length is -1 (null QString).
    pub fn read_optional_string(&mut self) -> Result<Option<String>, PacketError> {
        let len = self.read_i32()?;
        if len == -1 {
            return Ok(None);
        }
        if len < 0 || len as usize > self.remaining() {
            return Err(PacketError::InvalidStringLength(len));
        }
        let bytes = self.take(len as usize)?;
        Ok(Some(String::from_utf8_lossy(bytes).into_owned()))
    }

    /// Read a Qt string, mapping null to an empty string
    pub fn read_string(&mut self) -> Result<String, PacketError> {
        Ok(self.read_optional_string()?.unwrap_or_default())
    }

    pub fn read_datetime(&mut self) -> Result<QDateTime, PacketError> {
        let julian_day = self.read_i64()?;
        let millis = self.read_u32()?;
        let spec = match self.read_u8()? {
            0 => TimeSpec::Local,
            1 => TimeSpec::Utc,
            2 => TimeSpec::OffsetFromUtc(self.read_i32()?),
            3 => TimeSpec::TimeZone(self.read_string()?),
            other => return Err(PacketError::InvalidTimeSpec(other)),
        };
        Ok(QDateTime { julian_day, millis, spec })
    }

    pub fn read_color(&mut self) -> Result<QColor, PacketError> {
        let spec = self.read_u8()?;
        let [alpha, _] = self.take_array::<2>()?;
        let [red, _] = self.take_array::<2>()?;
        let [green, _] = self.take_array::<2>()?;
        let [blue, _] = self.take_array::<2>()?;
        let _pad = self.read_u16()?;
        Ok(QColor { spec, alpha, red, green, blue })
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Growable big-endian packet builder
#[derive(Debug, Clone, Default)]
pub struct PacketWriter {
    buf: Vec<u8>,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(256) }
    }

    /// Start a packet: magic then schema. Must be the first write.
    pub fn with_header(schema: i32) -> Self {
        let mut w = Self::new();
        w.write_header(schema);
        w
    }

    pub fn write_header(&mut self, schema: i32) {
        self.write_u32(WSJTX_MAGIC);
        self.write_i32(schema);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_i8(&mut self, v: i8) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Write a Qt string (length-prefixed UTF-8)
    pub fn write_string(&mut self, s: &str) {
        let bytes = s.as_bytes();
        self.write_i32(bytes.len() as i32);
        self.buf.extend_from_slice(bytes);
    }

    /// Write a null QString (length -1)
    pub fn write_null_string(&mut self) {
        self.write_i32(-1);
    }

    pub fn write_optional_string(&mut self, s: Option<&str>) {
        match s {
            Some(s) => self.write_string(s),
            None => self.write_null_string(),
        }
    }

    pub fn write_datetime(&mut self, dt: &QDateTime) {
        self.write_i64(dt.julian_day);
        self.write_u32(dt.millis);
        match &dt.spec {
            TimeSpec::Local => self.write_u8(0),
            TimeSpec::Utc => self.write_u8(1),
            TimeSpec::OffsetFromUtc(offset) => {
                self.write_u8(2);
                self.write_i32(*offset);
            }
            TimeSpec::TimeZone(id) => {
                self.write_u8(3);
                self.write_string(id);
            }
        }
    }

    pub fn write_color(&mut self, c: &QColor) {
        self.write_u8(c.spec);
        for channel in [c.alpha, c.red, c.green, c.blue] {
            self.write_u8(channel);
            self.write_u8(channel);
        }
        self.write_u16(0);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_julian_day_known_dates() {
        let cases = [
            (2_451_545, (2000, 1, 1)),
            (2_440_588, (1970, 1, 1)),
            (2_400_001, (1858, 11, 17)),
            (2_460_370, (2024, 2, 29)),
            (2_299_161, (1582, 10, 15)),
            (2_299_160, (1582, 10, 4)),
        ];
        for (jd, (y, m, d)) in cases {
            let date = NaiveDate::from_ymd_opt(y, m, d).unwrap();
            assert_eq!(julian_day_to_date(jd), Some(date), "jd {}", jd);
            assert_eq!(date_to_julian_day(date), jd, "date {}", date);
        }
    }

    #[test]
    fn test_truncated_reads() {
        let data = [0x00, 0x01, 0x02];
        let mut r = PacketReader::new(&data);
        assert_eq!(
            r.read_u32(),
            Err(PacketError::Truncated { needed: 4, remaining: 3 })
        );
        // A failed read does not consume anything
        assert_eq!(r.position(), 0);
        assert_eq!(r.read_u16(), Ok(1));
        assert_eq!(r.read_u8(), Ok(2));
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_string_null_and_empty() {
        let mut w = PacketWriter::new();
        w.write_null_string();
        w.write_string("");
        w.write_string("CQ F5UKW JN03");
        let bytes = w.into_bytes();
        assert_eq!(&bytes[..4], &[0xff, 0xff, 0xff, 0xff]);

        let mut r = PacketReader::new(&bytes);
        assert_eq!(r.read_optional_string(), Ok(None));
        assert_eq!(r.read_optional_string(), Ok(Some(String::new())));
        assert_eq!(r.read_string(), Ok("CQ F5UKW JN03".to_string()));
    }

    #[test]
    fn test_string_bad_lengths() {
        let mut r = PacketReader::new(&[0xff, 0xff, 0xff, 0xfe]);
        assert_eq!(r.read_string(), Err(PacketError::InvalidStringLength(-2)));

        let mut r = PacketReader::new(&[0x00, 0x00, 0x00, 0x05, b'a', b'b']);
        assert_eq!(r.read_string(), Err(PacketError::InvalidStringLength(5)));
    }

    #[test]
    fn test_header_is_magic_then_schema() {
        let w = PacketWriter::with_header(3);
        assert_eq!(w.as_bytes(), &[0xad, 0xbc, 0xcb, 0xda, 0, 0, 0, 3]);
        let mut r = PacketReader::new(w.as_bytes());
        assert_eq!(r.read_header(), Ok((WSJTX_MAGIC, 3)));
    }

    #[test]
    fn test_color_layout() {
        let mut w = PacketWriter::new();
        w.write_color(&QColor::rgb(0x12, 0x34, 0x56));
        assert_eq!(
            w.as_bytes(),
            &[1, 0xff, 0xff, 0x12, 0x12, 0x34, 0x34, 0x56, 0x56, 0, 0]
        );
        let mut r = PacketReader::new(w.as_bytes());
        assert_eq!(r.read_color(), Ok(QColor::rgb(0x12, 0x34, 0x56)));
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_datetime_utc_and_offset() {
        let ts = Utc.with_ymd_and_hms(2023, 7, 14, 18, 30, 15).unwrap();
        let dt = QDateTime::from_utc(ts);
        assert_eq!(dt.julian_day, 2_460_140);
        assert_eq!(dt.millis, (18 * 3600 + 30 * 60 + 15) * 1000);
        assert_eq!(dt.to_utc(), Some(ts));

        let offset = QDateTime { spec: TimeSpec::OffsetFromUtc(3600), ..dt.clone() };
        let mut w = PacketWriter::new();
        w.write_datetime(&offset);
        // 8 + 4 + 1 + 4 bytes
        assert_eq!(w.len(), 17);
        let mut r = PacketReader::new(w.as_bytes());
        let back = r.read_datetime().unwrap();
        assert_eq!(back, offset);
        assert_eq!(back.to_utc(), Some(ts - Duration::hours(1)));
    }

    #[test]
    fn test_datetime_out_of_range_offset() {
        let last_day = date_to_julian_day(NaiveDate::MAX);
        assert_eq!(julian_day_to_date(last_day), Some(NaiveDate::MAX));

        let dt = QDateTime {
            julian_day: last_day,
            millis: 86_399_000,
            spec: TimeSpec::OffsetFromUtc(-3600),
        };
        assert_eq!(dt.to_utc(), None);

        let dt = QDateTime { julian_day: i64::MAX, millis: 0, spec: TimeSpec::OffsetFromUtc(i32::MIN) };
        assert_eq!(dt.to_utc(), None);
    }

    #[test]
    fn test_datetime_bad_spec() {
        let mut w = PacketWriter::new();
        w.write_i64(2_451_545);
        w.write_u32(0);
        w.write_u8(9);
        let mut r = PacketReader::new(w.as_bytes());
        assert_eq!(r.read_datetime(), Err(PacketError::InvalidTimeSpec(9)));
    }

    #[test]
    fn test_integer_boundaries() {
        let mut w = PacketWriter::new();
        w.write_i32(i32::MAX);
        w.write_i32(-42);
        w.write_i64(i64::MIN);
        w.write_f64(-0.25);
        w.write_i8(-1);
        let bytes = w.into_bytes();
        let mut r = PacketReader::new(&bytes);
        assert_eq!(r.read_i32(), Ok(i32::MAX));
        assert_eq!(r.read_i32(), Ok(-42));
        assert_eq!(r.read_i64(), Ok(i64::MIN));
        assert_eq!(r.read_f64(), Ok(-0.25));
        assert_eq!(r.read_i8(), Ok(-1));
    }
}
