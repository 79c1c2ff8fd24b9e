#![cfg(test)]
use crate::error::ErrorOutcome;
use crate::execution::{BlockHeader, ModuleId, Origin, Outcome};
use commonware_codec::Encode;

#[test]
fn module_id_derivation_is_stable() {
    let expected = commonware_utils::from_hex(
        "950bf07cbbc09d1cfad792c7605852b6e94aec2fdbfbe584ddbb7ee023336721",
    )
    .expect("valid hex");
    assert_eq!(ModuleId::from_name("bank").as_ref(), expected.as_slice());

    let expected = commonware_utils::from_hex(
        "f44a2ac06b3b7a20c2a0f40e22401f0bf4d255f02fcc1b657f7ffa28eb138103",
    )
    .expect("valid hex");
    assert_eq!(
        ModuleId::from_name("value-setter").as_ref(),
        expected.as_slice()
    );
}

#[test]
fn genesis_header_encoding_is_stable() {
    let expected = commonware_utils::from_hex(
        "000000000000000000000000000000007408df516f992ad11625745bdc6415ec0ae5ac3ec1b3ea4fcec274234bf337e8",
    )
    .expect("valid hex");
    assert_eq!(BlockHeader::genesis(0).encode().as_ref(), expected.as_slice());
}

#[test]
fn origin_encoding_is_stable() {
    assert_eq!(Origin::Genesis.encode().as_ref(), &[0u8]);
    assert_eq!(
        Origin::Transaction(42).encode().as_ref(),
        &[1u8, 0, 0, 0, 0, 0, 0, 0, 42]
    );
    assert_eq!(
        Origin::Block(7).encode().as_ref(),
        &[2u8, 0, 0, 0, 0, 0, 0, 0, 7]
    );
}

#[test]
fn outcome_encoding_is_stable() {
    assert_eq!(
        Outcome::Committed {
            first_event: 1,
            event_count: 2
        }
        .encode()
        .as_ref(),
        &[0u8, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 2]
    );
    assert_eq!(
        Outcome::Reverted(ErrorOutcome::new("x", "y")).encode().as_ref(),
        &[1u8, 0, 0, 0, 1, b'x', 0, 0, 0, 1, b'y', 0, 0, 0, 0]
    );
}
