use trove::membuf::MemBuffer;

const REFERENCE: &[u8] =
    b"Lorem ipsum dolor sit amet, consectetur adipiscing elit, sed do eiusmod tempor \
      incididunt ut labore et dolore magna aliqua. Ut enim ad minim veniam.";

#[test]
fn pieces_reassemble_identically() {
    // Feed the same reference data through buffers with wildly different
    // segment sizes, alternating copied and in-place writes.
    for alloc_size in [1usize, 2, 3, 5, 7, 10, 15, 97, 200] {
        let mut buffer = MemBuffer::new(alloc_size);
        let mut pos = 0;
        let mut in_place = false;
        while pos < REFERENCE.len() {
            let piece = (1 + (pos + alloc_size) % 9).min(REFERENCE.len() - pos);
            if in_place {
                let slice = buffer.allocate_space(piece);
                slice[..piece].copy_from_slice(&REFERENCE[pos..pos + piece]);
                buffer.add_allocated_space(piece);
            } else {
                buffer.add_data(&REFERENCE[pos..pos + piece]);
            }
            in_place = !in_place;
            pos += piece;
        }
        assert_eq!(buffer.size(), REFERENCE.len(), "alloc_size {alloc_size}");
        assert_eq!(buffer.take_data(), REFERENCE, "alloc_size {alloc_size}");
    }
}

#[test]
fn buffer_is_reusable_after_drain() {
    let mut buffer = MemBuffer::new(16);
    buffer.add_data(b"first pass");
    assert_eq!(buffer.take_data(), b"first pass");
    assert_eq!(buffer.size(), 0);
    buffer.add_data(b"second pass with more data than one segment holds");
    assert_eq!(
        buffer.take_data(),
        b"second pass with more data than one segment holds"
    );
}
