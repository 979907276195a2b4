//! Property tests for reply parsing and band-sweep aggregation.

use emf_daq::instrument::{parse_reply, Command, RawReply, Reading};
use emf_daq::measurement::aggregate;
use proptest::prelude::*;

fn parse(command: Command, raw: &str) -> Result<Reading, emf_daq::error::ParseFailure> {
    parse_reply(command, &RawReply::from(raw))
}

#[test]
fn equals_sign_scalar_reply() {
    assert_eq!(parse(Command::Emf, "EMF = 1.23").unwrap(), Reading::Scalar(1.23));
}

#[test]
fn band_sweep_with_unit_and_its_aggregate() {
    let reading = parse(Command::RfBand, "-40.0,-45.5,-38.2 dBm").unwrap();
    let samples = reading.as_vector().unwrap();
    assert_eq!(samples, &[-40.0, -45.5, -38.2]);

    let stats = aggregate(samples).unwrap();
    assert_eq!(stats.max, -38.2);
    assert_eq!(stats.min, -45.5);
    assert_eq!(stats.median, -40.0);
    assert!((stats.mean - -41.233).abs() < 1e-3);
    assert!((stats.stddev - 3.803).abs() < 1e-3);
}

#[test]
fn empty_reply_fails_numeric_commands() {
    for command in [Command::Emf, Command::Ef, Command::RfBand] {
        let failure = parse(command, "").unwrap_err();
        assert_eq!(failure.command, command);
        assert_eq!(failure.raw, "");
    }
}

proptest! {
    #[test]
    fn scalar_reply_yields_its_number(
        value in -1.0e6f64..1.0e6,
        pad in "[ \t]{0,3}",
        eq in prop::bool::ANY,
    ) {
        let sep = if eq { "=" } else { "" };
        let raw = format!("{pad}EMF{pad}{sep}{pad}{value}{pad}");
        prop_assert_eq!(parse(Command::Emf, &raw).unwrap(), Reading::Scalar(value));
    }

    #[test]
    fn unlabelled_replies_fail_cleanly(raw in "[a-z0-9 =.,+-]{0,40}") {
        // lowercase text can never contain the EMF label
        prop_assert!(parse(Command::Emf, &raw).is_err());
    }

    #[test]
    fn band_sweep_keeps_order(
        samples in prop::collection::vec(-120.0f64..-0.5, 1..60),
        suffix in prop::bool::ANY,
    ) {
        let mut raw = samples.iter().map(f64::to_string).collect::<Vec<_>>().join(",");
        if suffix {
            raw.push_str(" dBm");
        }
        prop_assert_eq!(parse(Command::RfBand, &raw).unwrap(), Reading::Vector(samples));
    }

    #[test]
    fn aggregate_is_pure(samples in prop::collection::vec(-120.0f64..0.0, 1..60)) {
        prop_assert_eq!(aggregate(&samples), aggregate(&samples));
    }

    #[test]
    fn single_sample_has_zero_stddev(x in -120.0f64..0.0) {
        prop_assert_eq!(aggregate(&[x]).unwrap().stddev, 0.0);
    }

    #[test]
    fn median_lies_between_extrema(samples in prop::collection::vec(-120.0f64..0.0, 1..60)) {
        let stats = aggregate(&samples).unwrap();
        prop_assert!(stats.min <= stats.median);
        prop_assert!(stats.median <= stats.max);
        prop_assert!(stats.stddev >= 0.0);
    }
}
