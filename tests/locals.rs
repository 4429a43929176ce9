use test_utils::{assert_contains_sequence, compile_to_rows};

#[test]
fn local_with_small_immediate() {
    let rows = compile_to_rows("int main() { int y = 5; }").unwrap();
    assert_contains_sequence(
        &rows,
        &[
            "main:",
            "addi r2, NULL, 5",
            "push[2] r2",
            "addi SP, SP, 2",
            "ret",
        ],
    );
}

#[test]
fn local_with_large_immediate_takes_movhi_movlo() {
    let rows = compile_to_rows("int main() { int y = 70000; }").unwrap();
    assert_contains_sequence(
        &rows,
        &[
            "main:",
            "movhi r2, 1",
            "movlo r2, 4464",
            "push[2] r2",
            "addi SP, SP, 2",
            "ret",
        ],
    );
}

#[test]
fn immediate_boundary_at_sixteen_bits() {
    let rows = compile_to_rows("int main() { int y = 32767; }").unwrap();
    assert_contains_sequence(&rows, &["addi r2, NULL, 32767"]);

    // One above must take the movhi/movlo path.
    let rows = compile_to_rows("int main() { int y = 32768; }").unwrap();
    assert_contains_sequence(&rows, &["movhi r2, 0", "movlo r2, 32768"]);
}

#[test]
fn negative_immediate_uses_addi() {
    let rows = compile_to_rows("int main() { int y = -32768; }").unwrap();
    assert_contains_sequence(&rows, &["addi r2, NULL, -32768"]);
}

#[test]
fn uninitialised_local_only_adjusts_the_stack() {
    let rows = compile_to_rows("int main() { int y; }").unwrap();
    assert_contains_sequence(&rows, &["main:", "subi SP, SP, 2", "addi SP, SP, 2", "ret"]);
}

#[test]
fn char_local_occupies_a_two_byte_slot() {
    let rows = compile_to_rows("int main() { char c = 'x'; }").unwrap();
    assert_contains_sequence(&rows, &["addi r2, NULL, 120", "push[2] r2", "addi SP, SP, 2"]);
}

#[test]
fn long_local_is_four_aligned() {
    // The int occupies bytes 0..2; the long needs 2 bytes of padding to
    // land on a 4-byte boundary, and the block frees all 8 bytes.
    let rows = compile_to_rows("int main() { int a = 1; long b = 2; }").unwrap();
    assert_contains_sequence(
        &rows,
        &[
            "addi r2, NULL, 1",
            "push[2] r2",
            "addi r3, NULL, 2",
            "subi SP, SP, 2",
            "push[4] r3",
            "addi SP, SP, 8",
            "ret",
        ],
    );
}

#[test]
fn local_initialised_from_expression() {
    let rows = compile_to_rows("int main() { int x = 1; int y = x + 2; }").unwrap();
    assert_contains_sequence(
        &rows,
        &[
            "addi r2, NULL, 1",
            "push[2] r2",
            "addi r2, r2, 2",
            "push[2] r2",
            "addi SP, SP, 4",
            "ret",
        ],
    );
}

#[test]
fn assignment_writes_through_to_the_frame() {
    let rows = compile_to_rows("int main() { int x = 1; x = x + 2; }").unwrap();
    assert_contains_sequence(
        &rows,
        &[
            "addi r2, NULL, 1",
            "push[2] r2",
            "addi r2, r2, 2",
            "str[2] r2, SP, 0",
            "addi SP, SP, 2",
            "ret",
        ],
    );
}

#[test]
fn assignment_to_global_goes_through_its_label() {
    let rows = compile_to_rows("int g; int main() { g = 7; }").unwrap();
    assert_contains_sequence(
        &rows,
        &["addi r2, NULL, 7", "addi r3, NULL, g", "str[2] r2, r3, 0"],
    );
}

#[test]
fn shadowing_still_compiles() {
    let asm = test_utils::compile_to_asm("int x; int main() { int x = 1; }").unwrap();
    assert!(asm.contains("push[2]"));
}
