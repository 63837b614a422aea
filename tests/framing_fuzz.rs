//! Randomized round-trips across a spread of payload sizes, using
//! `fastrand` for randomized buffer contents rather than a fixed
//! fixture set.

use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;

use transport_core::framing::{read_message_into, write_message};

#[test]
fn random_sized_payloads_round_trip() {
    let rng = fastrand::Rng::with_seed(0xC0FFEE);
    let (a, b) = UnixStream::pair().unwrap();

    for _ in 0..64 {
        let len = rng.usize(0..=4096);
        let payload: Vec<u8> = (0..len).map(|_| rng.u8(..)).collect();
        let msg_type = rng.u8(..);

        write_message(a.as_raw_fd(), msg_type, 0, &payload).unwrap();

        let mut buf = vec![0u8; 4096];
        let (header, got_len) = read_message_into(b.as_raw_fd(), &mut buf).unwrap();
        assert_eq!(header.msg_type, msg_type);
        assert_eq!(got_len, len);
        assert_eq!(&buf[..got_len], &payload[..]);
    }
}
