use crate::sim::SimTime;

#[test]
fn sim_time_unit_conversions() {
    assert_eq!(SimTime::from_millis(1), SimTime(1_000_000));
    assert_eq!(SimTime::from_secs(1), SimTime(1_000_000_000));
}

#[test]
fn sim_time_unit_conversions_saturate_on_overflow() {
    assert_eq!(SimTime::from_millis(u64::MAX), SimTime(u64::MAX));
    assert_eq!(SimTime::from_secs(u64::MAX), SimTime(u64::MAX));
    assert_eq!(SimTime::MAX.saturating_add(SimTime(1)), SimTime::MAX);
    assert_eq!(SimTime::ZERO.saturating_sub(SimTime(1)), SimTime::ZERO);
}

#[test]
fn seconds_round_to_the_nearest_nanosecond() {
    assert_eq!(SimTime::try_from_secs_f64(1.5), Some(SimTime(1_500_000_000)));
    assert_eq!(SimTime::try_from_secs_f64(0.1), Some(SimTime(100_000_000)));
    assert_eq!(SimTime::try_from_secs_f64(1e300), Some(SimTime::MAX));
    assert_eq!(SimTime::try_from_secs_f64(-1.0), None);
    assert_eq!(SimTime::try_from_secs_f64(f64::NAN), None);
    assert_eq!(SimTime(2_500_000_000).as_secs_f64(), 2.5);
}

#[test]
fn display_is_exact_seconds() {
    assert_eq!(SimTime::ZERO.to_string(), "0.000000000");
    assert_eq!(SimTime::from_secs(10).to_string(), "10.000000000");
    assert_eq!(SimTime(1_000_000_001).to_string(), "1.000000001");
}
