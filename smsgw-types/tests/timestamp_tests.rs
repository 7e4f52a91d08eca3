use chrono::{NaiveDate, NaiveDateTime};
use smsgw_types::{
    REVERSE_TIMESTAMP_BASE, format_timestamp, from_reverse_timestamp, parse_timestamp,
    to_reverse_timestamp, utc_now,
};

fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32, micro: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, mo, d)
        .unwrap()
        .and_hms_micro_opt(h, mi, s, micro)
        .unwrap()
}

// ── Wire format ──────────────────────────────────────────────────

#[test]
fn format_uses_fixed_six_digit_fraction() {
    assert_eq!(
        format_timestamp(&ts(2100, 10, 5, 11, 10, 9, 0)),
        "2100-10-05 11:10:09.000000"
    );
    assert_eq!(
        format_timestamp(&ts(2012, 1, 2, 3, 4, 5, 123)),
        "2012-01-02 03:04:05.000123"
    );
}

#[test]
fn parse_roundtrips_format() {
    let t = ts(2013, 7, 1, 23, 59, 59, 999_999);
    assert_eq!(parse_timestamp(&format_timestamp(&t)).unwrap(), t);
}

#[test]
fn parse_accepts_missing_fraction() {
    assert_eq!(
        parse_timestamp("2013-07-01 12:00:00").unwrap(),
        ts(2013, 7, 1, 12, 0, 0, 0)
    );
}

#[test]
fn parse_rejects_garbage() {
    assert!(parse_timestamp("yesterday").is_err());
    assert!(parse_timestamp("2013-07-01T12:00:00").is_err());
}

#[test]
fn formatted_timestamps_sort_chronologically() {
    let earlier = format_timestamp(&ts(2013, 7, 1, 9, 0, 0, 5));
    let later = format_timestamp(&ts(2013, 7, 1, 10, 0, 0, 0));
    assert!(earlier < later);
}

#[test]
fn utc_now_has_microsecond_precision() {
    let now = utc_now();
    assert_eq!(parse_timestamp(&format_timestamp(&now)).unwrap(), now);
}

// ── Reverse timestamps ───────────────────────────────────────────

#[test]
fn reverse_timestamp_of_epoch_is_base() {
    let epoch = ts(1970, 1, 1, 0, 0, 0, 0);
    let encoded = to_reverse_timestamp(&epoch).unwrap();
    assert_eq!(encoded, format!("{REVERSE_TIMESTAMP_BASE:x}"));
    assert_eq!(encoded.len(), 15);
}

#[test]
fn reverse_timestamp_is_fixed_width() {
    let encoded = to_reverse_timestamp(&ts(9999, 12, 31, 23, 59, 59, 999_999)).unwrap();
    assert_eq!(encoded.len(), 15);
    assert_eq!(from_reverse_timestamp(&encoded).unwrap(), ts(9999, 12, 31, 23, 59, 59, 999_999));
}

#[test]
fn reverse_timestamp_orders_newest_first() {
    let older = to_reverse_timestamp(&ts(2014, 1, 1, 0, 0, 0, 0)).unwrap();
    let newer = to_reverse_timestamp(&ts(2014, 1, 1, 0, 0, 0, 1)).unwrap();
    assert!(newer < older);
}

#[test]
fn reverse_timestamp_rejects_pre_epoch() {
    assert!(to_reverse_timestamp(&ts(1969, 12, 31, 23, 59, 59, 0)).is_err());
}

#[test]
fn from_reverse_timestamp_rejects_bad_input() {
    assert!(from_reverse_timestamp("not-hex").is_err());
    assert!(from_reverse_timestamp("ffffffffffffffff").is_err());
    assert!(from_reverse_timestamp("").is_err());
}
