//! Piecewise linear congruence codecs
//!
//! Some hosting systems expose opaque slugs that are really numeric ids
//! pushed through `id * multiplier + offset` and written in a custom
//! alphabet, with different parameters for different id ranges. Each range
//! is a [`Regime`]. Ids or slugs outside every known regime are rejected
//! with [`IdError::NotYetCharacterized`] instead of being guessed.

use crate::error::{IdError, IdResult};

/// One numeric range of a codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Regime {
    /// Exclusive upper bound of the ids in this regime; the lower bound is
    /// the previous regime's `below` (or zero)
    pub below: u64,
    pub multiplier: u64,
    pub offset: u64,
}

/// Ordered set of regimes over one alphabet
#[derive(Debug, Clone, Copy)]
pub struct PiecewiseCodec {
    name: &'static str,
    alphabet: &'static [u8],
    regimes: &'static [Regime],
}

impl PiecewiseCodec {
    /// `regimes` must be sorted by `below`
    pub const fn new(name: &'static str, alphabet: &'static [u8], regimes: &'static [Regime]) -> Self {
        Self {
            name,
            alphabet,
            regimes,
        }
    }

    /// Id range `[low, high)` covered by the regime at `index`
    fn bounds(&self, index: usize) -> (u64, u64) {
        let low = if index == 0 {
            0
        } else {
            self.regimes[index - 1].below
        };
        (low, self.regimes[index].below)
    }

    /// True once at least one regime is known
    pub fn is_calibrated(&self) -> bool {
        !self.regimes.is_empty()
    }

    pub fn encode(&self, id: u64) -> IdResult<String> {
        self.require_calibration()?;
        let index = (0..self.regimes.len())
            .find(|&i| {
                let (low, high) = self.bounds(i);
                low <= id && id < high
            })
            .ok_or_else(|| {
                IdError::NotYetCharacterized(format!("{} id {} is beyond known regimes", self.name, id))
            })?;

        let regime = self.regimes[index];
        let value = id
            .checked_mul(regime.multiplier)
            .and_then(|v| v.checked_add(regime.offset))
            .ok_or_else(|| IdError::NotYetCharacterized(format!("{} id {} overflows", self.name, id)))?;

        Ok(self.alphabet_encode(value))
    }

    pub fn decode(&self, slug: &str) -> IdResult<u64> {
        self.require_calibration()?;
        let value = self.alphabet_decode(slug)?;

        for index in 0..self.regimes.len() {
            let regime = self.regimes[index];
            let (low, high) = self.bounds(index);
            let first = low.saturating_mul(regime.multiplier).saturating_add(regime.offset);
            let last = (high - 1)
                .saturating_mul(regime.multiplier)
                .saturating_add(regime.offset);
            if value < first || value > last {
                continue;
            }

            let shifted = value - regime.offset;
            if shifted % regime.multiplier != 0 {
                return Err(IdError::NotYetCharacterized(format!(
                    "{} slug {} is not congruent with its regime",
                    self.name, slug
                )));
            }

            let id = shifted / regime.multiplier;
            // leading zero digits would alias a shorter slug
            if self.alphabet_encode(value) != slug {
                return Err(IdError::NotYetCharacterized(format!(
                    "{} slug {} has a non canonical rendering",
                    self.name, slug
                )));
            }
            return Ok(id);
        }

        Err(IdError::NotYetCharacterized(format!(
            "{} slug {} has an unrecognized lead pattern",
            self.name, slug
        )))
    }

    fn require_calibration(&self) -> IdResult<()> {
        if self.is_calibrated() {
            return Ok(());
        }
        Err(IdError::NotYetCharacterized(format!(
            "{} codec has no calibrated regimes",
            self.name
        )))
    }

    fn alphabet_encode(&self, mut value: u64) -> String {
        let base = self.alphabet.len() as u64;
        if value == 0 {
            return (self.alphabet[0] as char).to_string();
        }

        let mut digits = Vec::new();
        while value > 0 {
            digits.push(self.alphabet[(value % base) as usize]);
            value /= base;
        }
        digits.reverse();
        String::from_utf8_lossy(&digits).into_owned()
    }

    fn alphabet_decode(&self, slug: &str) -> IdResult<u64> {
        if slug.is_empty() {
            return Err(IdError::MalformedIdentifier {
                system: self.name,
                raw: slug.to_string(),
            });
        }

        let base = self.alphabet.len() as u64;
        slug.bytes().try_fold(0u64, |acc, byte| {
            let digit = self
                .alphabet
                .iter()
                .position(|&a| a == byte)
                .ok_or_else(|| IdError::MalformedIdentifier {
                    system: self.name,
                    raw: slug.to_string(),
                })?;
            acc.checked_mul(base)
                .and_then(|v| v.checked_add(digit as u64))
                .ok_or_else(|| {
                    IdError::NotYetCharacterized(format!("{} slug {} is too long", self.name, slug))
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_REGIMES: &[Regime] = &[
        Regime {
            below: 1_000,
            multiplier: 7,
            offset: 100,
        },
        Regime {
            below: 50_000,
            multiplier: 13,
            offset: 200_000,
        },
    ];

    const CODEC: PiecewiseCodec = PiecewiseCodec::new("test", b"0123456789abcdef", TEST_REGIMES);

    #[test]
    fn test_round_trip_first_regime() {
        for id in [0, 1, 17, 999] {
            let slug = CODEC.encode(id).unwrap();
            assert_eq!(CODEC.decode(&slug).unwrap(), id);
        }
    }

    #[test]
    fn test_round_trip_second_regime() {
        let slug = CODEC.encode(12_345).unwrap();
        assert_eq!(slug, format!("{:x}", 12_345 * 13 + 200_000));
        assert_eq!(CODEC.decode(&slug).unwrap(), 12_345);
    }

    #[test]
    fn test_id_beyond_regimes() {
        let err = CODEC.encode(50_000).unwrap_err();
        assert!(matches!(err, IdError::NotYetCharacterized(_)));
    }

    #[test]
    fn test_unrecognized_lead_pattern() {
        // between the two value ranges
        let err = CODEC.decode(&format!("{:x}", 150_000)).unwrap_err();
        assert!(matches!(err, IdError::NotYetCharacterized(_)));

        let err = CODEC.decode("ffffffffff").unwrap_err();
        assert!(matches!(err, IdError::NotYetCharacterized(_)));
    }

    #[test]
    fn test_non_congruent_slug() {
        let err = CODEC.decode(&format!("{:x}", 101)).unwrap_err();
        assert!(matches!(err, IdError::NotYetCharacterized(_)));
    }

    #[test]
    fn test_uncalibrated_codec_rejects_everything() {
        const EMPTY: PiecewiseCodec = PiecewiseCodec::new("empty", b"0123456789", &[]);
        assert!(!EMPTY.is_calibrated());
        assert!(matches!(EMPTY.encode(1), Err(IdError::NotYetCharacterized(_))));
        assert!(matches!(EMPTY.decode("12"), Err(IdError::NotYetCharacterized(_))));
        assert!(matches!(EMPTY.decode("xyz"), Err(IdError::NotYetCharacterized(_))));
    }

    #[test]
    fn test_foreign_characters_are_malformed() {
        let err = CODEC.decode("xyz").unwrap_err();
        assert!(matches!(err, IdError::MalformedIdentifier { .. }));
    }
}
