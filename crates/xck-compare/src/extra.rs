//! Istanbul consensus extra data carried in legacy block headers.
//!
//! `extraData` is a 32-byte vanity prefix followed by
//! `rlp(IstanbulExtra)`. The migration dropped the block's own aggregated
//! seal, so the reference side has to be rewritten with that seal zeroed
//! before it can match the candidate.
//!
//! Decoding is strict: exactly six top-level items, three per seal, 20-byte
//! addresses, 96-byte BLS keys, canonical integers and no trailing bytes.

use num_bigint::BigUint;
use rlp::{Rlp, RlpStream};
use xck_schemas::Address;

use crate::error::ProtocolDecodeError;

pub const ISTANBUL_EXTRA_VANITY: usize = 32;

const BLS_PUBLIC_KEY_LEN: usize = 96;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatedSeal {
    /// One bit per validator that signed.
    pub bitmap: BigUint,
    pub signature: Vec<u8>,
    pub round: BigUint,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IstanbulExtra {
    pub added_validators: Vec<Address>,
    pub added_validators_public_keys: Vec<[u8; BLS_PUBLIC_KEY_LEN]>,
    pub removed_validators: BigUint,
    pub seal: Vec<u8>,
    pub aggregated_seal: AggregatedSeal,
    pub parent_aggregated_seal: AggregatedSeal,
}

fn rlp_err(e: rlp::DecoderError) -> ProtocolDecodeError {
    ProtocolDecodeError::Rlp(e.to_string())
}

fn bad(msg: impl Into<String>) -> ProtocolDecodeError {
    ProtocolDecodeError::Rlp(msg.into())
}

fn list_of(r: &Rlp<'_>, len: usize, what: &str) -> Result<(), ProtocolDecodeError> {
    if !r.is_list() {
        return Err(bad(format!("{what}: expected a list")));
    }
    let got = r.item_count().map_err(rlp_err)?;
    if got != len {
        return Err(bad(format!("{what}: expected {len} items, got {got}")));
    }
    Ok(())
}

fn bytes_of<'a>(r: &Rlp<'a>, what: &str) -> Result<&'a [u8], ProtocolDecodeError> {
    if !r.is_data() {
        return Err(bad(format!("{what}: expected a byte string")));
    }
    r.data().map_err(rlp_err)
}

fn uint_of(r: &Rlp<'_>, what: &str) -> Result<BigUint, ProtocolDecodeError> {
    let bytes = bytes_of(r, what)?;
    if bytes.first() == Some(&0) {
        return Err(bad(format!("{what}: non-canonical integer (leading zero bytes)")));
    }
    Ok(BigUint::from_bytes_be(bytes))
}

fn uint_bytes(v: &BigUint) -> Vec<u8> {
    if v.bits() == 0 {
        Vec::new()
    } else {
        v.to_bytes_be()
    }
}

impl AggregatedSeal {
    fn decode(r: &Rlp<'_>, what: &str) -> Result<Self, ProtocolDecodeError> {
        list_of(r, 3, what)?;
        Ok(Self {
            bitmap: uint_of(&r.at(0).map_err(rlp_err)?, what)?,
            signature: bytes_of(&r.at(1).map_err(rlp_err)?, what)?.to_vec(),
            round: uint_of(&r.at(2).map_err(rlp_err)?, what)?,
        })
    }

    fn append(&self, s: &mut RlpStream) {
        s.begin_list(3);
        s.append(&uint_bytes(&self.bitmap).as_slice());
        s.append(&self.signature.as_slice());
        s.append(&uint_bytes(&self.round).as_slice());
    }
}

impl IstanbulExtra {
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolDecodeError> {
        let r = Rlp::new(bytes);
        let info = r.payload_info().map_err(rlp_err)?;
        if info.header_len + info.value_len != bytes.len() {
            return Err(bad(format!(
                "{} trailing bytes after istanbul extra",
                bytes.len() - (info.header_len + info.value_len).min(bytes.len())
            )));
        }
        list_of(&r, 6, "istanbul extra")?;

        let validators = r.at(0).map_err(rlp_err)?;
        if !validators.is_list() {
            return Err(bad("added validators: expected a list"));
        }
        let mut added_validators = Vec::new();
        for item in validators.iter() {
            let raw = bytes_of(&item, "added validator")?;
            let addr = Address::from_slice(raw).map_err(|e| bad(format!("added validator: {e}")))?;
            added_validators.push(addr);
        }

        let keys = r.at(1).map_err(rlp_err)?;
        if !keys.is_list() {
            return Err(bad("added validator keys: expected a list"));
        }
        let mut added_validators_public_keys = Vec::new();
        for item in keys.iter() {
            let raw = bytes_of(&item, "added validator key")?;
            let key: [u8; BLS_PUBLIC_KEY_LEN] = raw.try_into().map_err(|_| {
                bad(format!(
                    "added validator key: expected {BLS_PUBLIC_KEY_LEN} bytes, got {}",
                    raw.len()
                ))
            })?;
            added_validators_public_keys.push(key);
        }

        Ok(Self {
            added_validators,
            added_validators_public_keys,
            removed_validators: uint_of(&r.at(2).map_err(rlp_err)?, "removed validators")?,
            seal: bytes_of(&r.at(3).map_err(rlp_err)?, "seal")?.to_vec(),
            aggregated_seal: AggregatedSeal::decode(&r.at(4).map_err(rlp_err)?, "aggregated seal")?,
            parent_aggregated_seal: AggregatedSeal::decode(
                &r.at(5).map_err(rlp_err)?,
                "parent aggregated seal",
            )?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut s = RlpStream::new_list(6);
        s.begin_list(self.added_validators.len());
        for addr in &self.added_validators {
            s.append(&addr.as_bytes());
        }
        s.begin_list(self.added_validators_public_keys.len());
        for key in &self.added_validators_public_keys {
            s.append(&key.as_slice());
        }
        s.append(&uint_bytes(&self.removed_validators).as_slice());
        s.append(&self.seal.as_slice());
        self.aggregated_seal.append(&mut s);
        self.parent_aggregated_seal.append(&mut s);
        s.out().to_vec()
    }
}

/// Rewrite `extra` (vanity + rlp) with the aggregated seal zeroed.
pub fn strip_aggregated_seal(extra: &[u8]) -> Result<Vec<u8>, ProtocolDecodeError> {
    if extra.len() < ISTANBUL_EXTRA_VANITY {
        return Err(ProtocolDecodeError::ExtraTooShort {
            got: extra.len(),
            vanity: ISTANBUL_EXTRA_VANITY,
        });
    }
    let (vanity, encoded) = extra.split_at(ISTANBUL_EXTRA_VANITY);
    let mut decoded = IstanbulExtra::decode(encoded)?;
    decoded.aggregated_seal = AggregatedSeal::default();

    let mut out = Vec::with_capacity(extra.len());
    out.extend_from_slice(vanity);
    out.extend_from_slice(&decoded.encode());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(seal: AggregatedSeal) -> IstanbulExtra {
        IstanbulExtra {
            added_validators: vec![Address([0x11; 20]), Address([0x22; 20])],
            added_validators_public_keys: vec![[0x33; 96]],
            removed_validators: BigUint::from(5u32),
            seal: vec![0x44; 65],
            aggregated_seal: seal,
            parent_aggregated_seal: AggregatedSeal {
                bitmap: BigUint::from(0b1011u32),
                signature: vec![0x55; 48],
                round: BigUint::from(0u32),
            },
        }
    }

    fn with_vanity(extra: &IstanbulExtra) -> Vec<u8> {
        let mut out = vec![0xee; ISTANBUL_EXTRA_VANITY];
        out.extend_from_slice(&extra.encode());
        out
    }

    #[test]
    fn decode_inverts_encode() {
        let e = sample(AggregatedSeal {
            bitmap: BigUint::from(7u32),
            signature: vec![1, 2, 3],
            round: BigUint::from(2u32),
        });
        assert_eq!(IstanbulExtra::decode(&e.encode()).unwrap(), e);
    }

    #[test]
    fn zero_seal_encodes_as_three_empty_strings() {
        let mut s = RlpStream::new();
        AggregatedSeal::default().append(&mut s);
        assert_eq!(s.out().to_vec(), vec![0xc3, 0x80, 0x80, 0x80]);
    }

    #[test]
    fn stripping_an_already_zero_seal_is_a_no_op() {
        let bytes = with_vanity(&sample(AggregatedSeal::default()));
        assert_eq!(strip_aggregated_seal(&bytes).unwrap(), bytes);
    }

    #[test]
    fn stripping_zeroes_only_the_block_seal() {
        let original = sample(AggregatedSeal {
            bitmap: BigUint::from(0xffu32),
            signature: vec![9; 96],
            round: BigUint::from(1u32),
        });
        let stripped = strip_aggregated_seal(&with_vanity(&original)).unwrap();
        assert_eq!(&stripped[..ISTANBUL_EXTRA_VANITY], &[0xee; ISTANBUL_EXTRA_VANITY][..]);

        let decoded = IstanbulExtra::decode(&stripped[ISTANBUL_EXTRA_VANITY..]).unwrap();
        assert_eq!(decoded.aggregated_seal, AggregatedSeal::default());
        assert_eq!(decoded.parent_aggregated_seal, original.parent_aggregated_seal);
        assert_eq!(decoded.seal, original.seal);
        assert_eq!(strip_aggregated_seal(&stripped).unwrap(), stripped);
    }

    #[test]
    fn short_or_malformed_extra_is_rejected() {
        assert!(matches!(
            strip_aggregated_seal(&[0u8; 10]),
            Err(ProtocolDecodeError::ExtraTooShort { got: 10, vanity: 32 })
        ));

        let mut truncated = with_vanity(&sample(AggregatedSeal::default()));
        truncated.truncate(truncated.len() - 3);
        assert!(strip_aggregated_seal(&truncated).is_err());

        let mut trailing = with_vanity(&sample(AggregatedSeal::default()));
        trailing.push(0x00);
        assert!(strip_aggregated_seal(&trailing).is_err());

        let mut five_items = RlpStream::new_list(5);
        for _ in 0..5 {
            five_items.append_empty_data();
        }
        let mut bytes = vec![0u8; ISTANBUL_EXTRA_VANITY];
        bytes.extend_from_slice(&five_items.out());
        assert!(strip_aggregated_seal(&bytes).is_err());
    }

    #[test]
    fn leading_zero_integer_is_non_canonical() {
        let mut s = RlpStream::new_list(6);
        s.begin_list(0);
        s.begin_list(0);
        s.append(&[0u8, 1u8].as_slice());
        s.append_empty_data();
        AggregatedSeal::default().append(&mut s);
        AggregatedSeal::default().append(&mut s);
        assert!(IstanbulExtra::decode(&s.out()).is_err());
    }
}
