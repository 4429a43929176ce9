use test_utils::{assert_contains_sequence, compile_to_rows, row_index};

#[test]
fn parameters_are_loaded_from_past_the_return_slot() {
    let rows = compile_to_rows("int add(int a int b) { return a + b; }").unwrap();
    assert_contains_sequence(
        &rows,
        &[
            "add:",
            "ld[2] r2, SP, 2",
            "ld[2] r3, SP, 4",
            "add r2, r2, r3",
            "move RV, r2",
            "ret",
        ],
    );
}

#[test]
fn prototype_emits_nothing() {
    let rows = compile_to_rows("int f();").unwrap();
    assert!(rows.is_empty());
}

#[test]
fn call_pushes_arguments_and_pops_them_after() {
    let rows =
        compile_to_rows("int add(int a int b) { return a + b; } int main() { int r = add(1 2); }")
            .unwrap();

    let call = row_index(&rows, "call add");
    // Both arguments are staged on the stack before the call, last one
    // first, and the caller frees them afterwards.
    assert!(rows[call - 1].starts_with("push[2]"));
    assert!(rows[call - 3].starts_with("push[2]"));
    assert_eq!(rows[call + 1], "addi SP, SP, 4");

    // The first argument is pushed last, so it sits just above the
    // return-address slot.
    assert!(rows[call - 2].ends_with("NULL, 1"));
}

#[test]
fn call_result_is_taken_from_rv() {
    let rows = compile_to_rows("int f(); int main() { int x = f(); }").unwrap();
    assert_contains_sequence(&rows, &["call f", "move r2, RV", "push[2] r2"]);
}

#[test]
fn call_clobber_saves_the_left_operand() {
    let rows = compile_to_rows("int f(); int g(); int main() { int z = f() + g(); }").unwrap();
    assert_contains_sequence(
        &rows,
        &[
            "call f",
            "move r2, RV",
            "push[2] r2",
            "call g",
            "pop[2] r3",
            "add r3, r3, RV",
            "push[2] r3",
            "addi SP, SP, 2",
            "ret",
        ],
    );
}

#[test]
fn void_style_call_statement_compiles() {
    let rows = compile_to_rows("int f(); int main() { f(); }").unwrap();
    assert_contains_sequence(&rows, &["main:", "call f", "ret"]);
}

#[test]
fn asm_escape_substitutes_registers_positionally() {
    let rows = compile_to_rows("int main() { int x = 1; asm(\"add %0, %0, 5\" x); }").unwrap();
    assert_contains_sequence(
        &rows,
        &[
            "addi r2, NULL, 1",
            "push[2] r2",
            "add r2, r2, 5",
            "addi SP, SP, 2",
            "ret",
        ],
    );
}

#[test]
fn asm_escape_substitutes_literals_and_splits_lines() {
    let rows = compile_to_rows("int main() { asm(\"subi SP, SP, %0\\naddi SP, SP, %0\" 8); }").unwrap();
    assert_contains_sequence(&rows, &["subi SP, SP, 8", "addi SP, SP, 8"]);
}

#[test]
fn unknown_identifier_is_a_translation_error() {
    let error = test_utils::compile_to_asm("int main() { x = 1; }").unwrap_err();
    assert!(error.to_string().contains("Unknown identifier 'x'"));
}
