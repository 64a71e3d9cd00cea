// Integration tests for `SimulatedBus` driven through the `BusTransport` trait object.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use pretty_assertions::assert_eq;

use dali2mqtt_bus::sequence::{MEMORY_GTIN, MEMORY_LUMINAIRE_ID};
use dali2mqtt_bus::{
    Address, BusTransport, ColourValue, Command, Error, Opcode, Response, Sequence, SimulatedBus,
    VirtualGear,
};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup(gear: Vec<VirtualGear>) -> (Arc<SimulatedBus>, Arc<dyn BusTransport>) {
    let sim = Arc::new(SimulatedBus::new(gear));
    let transport: Arc<dyn BusTransport> = sim.clone();
    transport.connect().await.unwrap();
    (sim, transport)
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_frames_are_logged_in_order() {
    let (sim, bus) = setup(vec![VirtualGear::new(1)]).await;

    bus.send(Command::arc(Address::Individual(1), 100))
        .await
        .unwrap();
    bus.send(Command::gear(Address::Individual(1), Opcode::QueryActualLevel))
        .await
        .unwrap();

    assert_eq!(
        sim.commands(),
        vec![
            Command::arc(Address::Individual(1), 100),
            Command::gear(Address::Individual(1), Opcode::QueryActualLevel),
        ]
    );
}

#[tokio::test]
async fn test_colour_query_through_trait_object() {
    let (sim, bus) = setup(vec![VirtualGear::new(6).with_colour(153, 370, 270)]).await;

    let value = bus
        .run_sequence(&Sequence::QueryColourValue {
            address: Address::Individual(6),
            value: ColourValue::Temperature,
        })
        .await
        .unwrap();

    assert_eq!(value.colour(), Some(270));
    assert_eq!(
        sim.commands(),
        vec![
            Command::dtr0(ColourValue::Temperature as u8),
            Command::enable_device_type(8),
            Command::gear(Address::Individual(6), Opcode::Dt8QueryColourValue),
            Command::gear(Address::Individual(6), Opcode::QueryContentDtr0),
        ]
    );
}

#[tokio::test]
async fn test_memory_bank_fields() {
    let mut gear = VirtualGear::new(2);
    gear.gtin = Some(4_012_345_678_901);
    gear.luminaire_id = Some("LUM-42".into());
    let (_sim, bus) = setup(vec![gear]).await;

    let gtin = bus
        .run_sequence(&Sequence::ReadMemory {
            address: Address::Individual(2),
            field: MEMORY_GTIN,
        })
        .await
        .unwrap()
        .into_memory();
    let bytes: Vec<u8> = gtin.into_iter().map(Option::unwrap).collect();
    let mut padded = [0u8; 8];
    padded[2..].copy_from_slice(&bytes);
    assert_eq!(u64::from_be_bytes(padded), 4_012_345_678_901);

    let id = bus
        .run_sequence(&Sequence::ReadMemory {
            address: Address::Individual(2),
            field: MEMORY_LUMINAIRE_ID,
        })
        .await
        .unwrap()
        .into_memory();
    let text: String = id.into_iter().map(|b| char::from(b.unwrap())).collect();
    assert_eq!(text.trim_end(), "LUM-42");
}

#[tokio::test]
async fn test_timeouts_are_errors_not_answers() {
    let (sim, bus) = setup(vec![VirtualGear::new(3)]).await;
    sim.set_timeout(3, true);

    let err = bus
        .send(Command::gear(
            Address::Individual(3),
            Opcode::QueryControlGearPresent,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));

    sim.set_timeout(3, false);
    let ok = bus
        .send(Command::gear(
            Address::Individual(3),
            Opcode::QueryControlGearPresent,
        ))
        .await
        .unwrap();
    assert_eq!(ok, Response::Answer(0xFF));
}

#[tokio::test]
async fn test_failing_connects_then_recovery() {
    let sim = Arc::new(SimulatedBus::new(vec![]));
    sim.fail_next_connects(2);

    assert!(sim.connect().await.is_err());
    assert!(sim.connect().await.is_err());
    sim.connect().await.unwrap();
    assert!(sim.is_connected());
    assert_eq!(sim.connect_count(), 1);
}
