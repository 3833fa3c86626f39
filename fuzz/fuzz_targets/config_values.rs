//! Parsing of configuration values and arithmetic on what they produce

#![no_main]

use arbitrary::Arbitrary;
use gossim_core::{Decimal, MathContext, NumericGenerator, Rounding, SimRng};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    generator: String,
    rounding: String,
    precision: u32,
    seed: u64,
    a: String,
    b: String,
}

fuzz_target!(|input: Input| {
    // a generator that parses has passed validation, so sampling is total
    if let Ok(generator) = input.generator.parse::<NumericGenerator>() {
        let mut rng = SimRng::new(input.seed);
        let _ = generator.sample(&mut rng);
        assert_eq!(generator.to_string().parse::<NumericGenerator>().ok(), Some(generator));
    }

    let rounding = input.rounding.parse::<Rounding>().unwrap_or_default();
    let math = MathContext::new(input.precision, rounding);
    if let (Ok(a), Ok(b)) = (input.a.parse::<Decimal>(), input.b.parse::<Decimal>()) {
        let _ = math.add(a, b);
        let _ = math.sub(a, b);
        let _ = math.mul(a, b);
        let _ = math.div(a, b);
        let rounded = math.round(a);
        assert_eq!(math.round(rounded), rounded);
    }
});
