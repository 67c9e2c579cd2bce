use proptest::prelude::*;
use plclink_core::encoding::{Reader, Writer};
use plclink_core::frame::tcp::{decode_frame, MAX_ADU_LEN};
use plclink_core::pdu::{ReadRequest, Request, Response, MAX_READ_BITS, MAX_READ_REGISTERS};

proptest! {
    #[test]
    fn read_encode_accepts_exactly_the_legal_spans(start in any::<u16>(), quantity in 0u16..=2100u16, bits in any::<bool>()) {
        let (req, max) = if bits {
            (ReadRequest::coils(start, quantity), MAX_READ_BITS)
        } else {
            (ReadRequest::holding_registers(start, quantity), MAX_READ_REGISTERS)
        };
        let mut buf = [0u8; 8];
        let mut w = Writer::new(&mut buf);
        let legal = quantity >= 1 && quantity <= max && u32::from(start) + u32::from(quantity) <= 0x1_0000;
        prop_assert_eq!(Request::Read(req).encode(&mut w).is_ok(), legal);
    }

    #[test]
    fn random_response_decode_does_not_panic(data in proptest::collection::vec(any::<u8>(), 0..260)) {
        let mut r = Reader::new(&data);
        let _ = Response::decode(&mut r);
    }

    #[test]
    fn random_frame_decode_does_not_panic(data in proptest::collection::vec(any::<u8>(), 0..MAX_ADU_LEN + 8)) {
        let mut r = Reader::new(&data);
        let _ = decode_frame(&mut r);
    }

    #[test]
    fn register_reply_reencodes_identically(registers in proptest::collection::vec(any::<u16>(), 1..=125)) {
        let mut frame = vec![0x03, (registers.len() * 2) as u8];
        for reg in &registers {
            frame.extend_from_slice(&reg.to_be_bytes());
        }

        let mut r = Reader::new(&frame);
        let decoded = Response::decode(&mut r).unwrap();

        let mut out = vec![0u8; frame.len() + 8];
        let mut w = Writer::new(&mut out);
        decoded.encode(&mut w).unwrap();
        prop_assert_eq!(w.as_written(), frame.as_slice());
    }
}
