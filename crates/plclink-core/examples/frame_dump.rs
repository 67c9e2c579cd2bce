use plclink_core::encoding::{Reader, Writer};
use plclink_core::frame::tcp::{decode_frame, encode_frame, MAX_ADU_LEN};
use plclink_core::pdu::{ReadRequest, Request, Response};

fn main() {
    let mut pdu_buf = [0u8; MAX_ADU_LEN];
    let mut w = Writer::new(&mut pdu_buf);
    if let Err(err) = Request::Read(ReadRequest::holding_registers(100, 2)).encode(&mut w) {
        eprintln!("encode failed: {err}");
        return;
    }
    let pdu = w.as_written().to_vec();

    let mut adu_buf = [0u8; MAX_ADU_LEN];
    let mut w = Writer::new(&mut adu_buf);
    if let Err(err) = encode_frame(&mut w, 1, 1, &pdu) {
        eprintln!("framing failed: {err}");
        return;
    }
    println!("request adu: {:02X?}", w.as_written());

    let reply = [
        0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x04, 0x00, 0xEB, 0x00, 0x7D,
    ];
    let mut r = Reader::new(&reply);
    let (header, body) = match decode_frame(&mut r) {
        Ok(frame) => frame,
        Err(err) => {
            eprintln!("bad frame: {err}");
            return;
        }
    };
    println!("reply tid={} unit={}", header.transaction_id, header.unit_id);

    let mut r = Reader::new(body);
    match Response::decode(&mut r) {
        Ok(Response::ReadHoldingRegisters(resp)) => {
            for idx in 0..resp.register_count() {
                println!("register[{}] = {}", 100 + idx, resp.register(idx).unwrap_or_default());
            }
        }
        Ok(other) => println!("unexpected response: {other:?}"),
        Err(err) => eprintln!("bad pdu: {err}"),
    }
}
