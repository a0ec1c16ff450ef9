/// Approximate timestamp decoders.
///
/// All decoders convert a timestamp fragment into a rough millisecond
/// count using constant month and year lengths, with years counted
/// from 1970.  We only care about durations between path transitions,
/// so accurate timekeeping buys nothing here and a calendar library
/// would change the output; manual decoding is also much faster than a
/// full parse.  Input that does not fit the expected layout produces
/// bounded nonsense values (non-digit bytes decode as zero, arithmetic
/// wraps), never an error.

pub const MS_IN_YEAR: u64 = 31_104_000_000;
pub const MS_IN_MONTH: u64 = 2_592_000_000;
pub const MS_IN_DAY: u64 = 86_400_000;
pub const MS_IN_HOUR: u64 = 3_600_000;
pub const MS_IN_MIN: u64 = 60_000;
pub const MS_IN_SEC: u64 = 1_000;

// Digit value of the byte at `i`; zero for non-digits and for bytes
// past the end of the field.
fn digit(s: &[u8], i: usize) -> u64 {
    match s.get(i) {
        Some(b) if b.is_ascii_digit() => (b - b'0') as u64,
        _ => 0,
    }
}

/// Decode `YYYY-MM-DDTHH:MM:SS` with an optional `.mmm` fraction.
pub fn rfc3339_to_ms(s: &[u8]) -> u64 {
    let mut ms = rfc3339_no_ms_to_ms(s);
    if s.get(19) == Some(&b'.') {
        let frac = digit(s, 20) * 100 + digit(s, 21) * 10 + digit(s, 22);
        ms = ms.wrapping_add(frac);
    }
    ms
}

/// Decode `YYYY-MM-DDTHH:MM:SS`, ignoring any fraction.
pub fn rfc3339_no_ms_to_ms(s: &[u8]) -> u64 {
    let year = (digit(s, 0) * 1000 + digit(s, 1) * 100 + digit(s, 2) * 10 + digit(s, 3))
        .wrapping_sub(1970);
    let month = digit(s, 5) * 10 + digit(s, 6);
    let day = digit(s, 8) * 10 + digit(s, 9);
    let hour = digit(s, 11) * 10 + digit(s, 12);
    let min = digit(s, 14) * 10 + digit(s, 15);
    let sec = digit(s, 17) * 10 + digit(s, 18);

    year.wrapping_mul(MS_IN_YEAR)
        .wrapping_add(month.wrapping_mul(MS_IN_MONTH))
        .wrapping_add(day.wrapping_mul(MS_IN_DAY))
        .wrapping_add(hour * MS_IN_HOUR)
        .wrapping_add(min * MS_IN_MIN)
        .wrapping_add(sec * MS_IN_SEC)
}

/// Decode the date part `YYYY-MM-DD`.
pub fn date_to_ms(s: &[u8]) -> u64 {
    let year = (digit(s, 0) * 1000 + digit(s, 1) * 100 + digit(s, 2) * 10 + digit(s, 3))
        .wrapping_sub(1970);
    let month = digit(s, 5) * 10 + digit(s, 6);
    let day = digit(s, 8) * 10 + digit(s, 9);

    year.wrapping_mul(MS_IN_YEAR)
        .wrapping_add(month.wrapping_mul(MS_IN_MONTH))
        .wrapping_add(day.wrapping_mul(MS_IN_DAY))
}

/// Decode the time-of-day part `HH:MM:SS`.
pub fn time_to_ms(s: &[u8]) -> u64 {
    let hour = digit(s, 0) * 10 + digit(s, 1);
    let min = digit(s, 3) * 10 + digit(s, 4);
    let sec = digit(s, 6) * 10 + digit(s, 7);

    hour * MS_IN_HOUR + min * MS_IN_MIN + sec * MS_IN_SEC
}

// This tests:
//  - the constant-calendar arithmetic on a known timestamp
//  - the optional millisecond fraction

#[test]
fn test_rfc3339_to_ms() {
    let base = 10 * MS_IN_MONTH + 12 * MS_IN_DAY + 7 * MS_IN_HOUR + 33 * MS_IN_MIN + 14 * MS_IN_SEC;
    let year = 53 * MS_IN_YEAR; // 2023 - 1970
    assert!(rfc3339_to_ms(b"2023-10-12T07:33:14.000") == year + base);
    assert!(rfc3339_to_ms(b"2023-10-12T07:33:14.250") == year + base + 250);
    assert!(rfc3339_to_ms(b"2023-10-12T07:33:14") == year + base);
    assert!(rfc3339_no_ms_to_ms(b"2023-10-12T07:33:14.250") == year + base);
}

// This tests:
//  - consecutive seconds differ by exactly 1000 ms, the property the
//    transition durations rely on

#[test]
fn test_rfc3339_second_steps() {
    let t1 = rfc3339_to_ms(b"1970-01-01T00:00:01.000");
    let t2 = rfc3339_to_ms(b"1970-01-01T00:00:02.000");
    let t3 = rfc3339_to_ms(b"1970-01-01T00:00:03.000");
    assert!(t2 - t1 == 1000);
    assert!(t3 - t2 == 1000);
}

// This tests:
//  - a date plus a time-of-day equals the full timestamp

#[test]
fn test_date_and_time_compose() {
    let full = rfc3339_to_ms(b"2024-02-29T23:59:59");
    assert!(date_to_ms(b"2024-02-29") + time_to_ms(b"23:59:59") == full);
}

// This tests:
//  - short and garbage input decode to something bounded instead of
//    trapping

#[test]
fn test_degenerate_input() {
    rfc3339_to_ms(b"");
    rfc3339_to_ms(b"2023");
    rfc3339_to_ms(b"not a timestamp at all!");
    date_to_ms(b"-");
    time_to_ms(b"::");
    assert!(time_to_ms(b"") == 0);
}
