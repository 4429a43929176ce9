use test_utils::{assert_contains_sequence, compile_to_rows};

#[test]
fn chained_subtraction_evaluates_left_to_right() {
    let rows = compile_to_rows("int a; int b; int c; int f() { return a - b - c; }").unwrap();
    assert_contains_sequence(
        &rows,
        &[
            "addi r2, NULL, a",
            "ld[2] r2, r2, 0",
            "addi r3, NULL, b",
            "ld[2] r3, r3, 0",
            "sub r2, r2, r3",
            "addi r5, NULL, c",
            "ld[2] r5, r5, 0",
            "sub r2, r2, r5",
            "move RV, r2",
            "ret",
        ],
    );
}

#[test]
fn relational_materialises_zero_or_one() {
    let rows = compile_to_rows("int a; int b; int main() { int z = a == b; }").unwrap();
    assert_contains_sequence(
        &rows,
        &[
            "cmp r2, r3",
            "breq L1",
            "addi r2, NULL, 0",
            "jmp L2",
            "L1:",
            "addi r2, NULL, 1",
            "L2:",
            "push[2] r2",
        ],
    );
}

#[test]
fn relational_with_constant_uses_cmpi() {
    let rows = compile_to_rows("int a; int main() { int z = a < 10; }").unwrap();
    assert_contains_sequence(&rows, &["cmpi r2, 10", "brlt L1"]);
}

#[test]
fn immediate_addition_uses_addi() {
    let rows = compile_to_rows("int a; int main() { int z = a + 3; }").unwrap();
    assert_contains_sequence(&rows, &["ld[2] r2, r2, 0", "addi r2, r2, 3"]);
}

#[test]
fn constant_left_operand_is_loaded_first() {
    let rows = compile_to_rows("int a; int main() { int z = 100000 + a; }").unwrap();
    assert_contains_sequence(&rows, &["movhi r2, 1", "movlo r2, 34464"]);
    assert_contains_sequence(&rows, &["add r2, r2, r3"]);
}

#[test]
fn multiplication_has_no_immediate_form() {
    let rows = compile_to_rows("int a; int main() { int z = a * 3; }").unwrap();
    assert_contains_sequence(&rows, &["addi r3, NULL, 3", "mult r2, r2, r3"]);
}

#[test]
fn bitwise_operators_emit_and_or() {
    let rows = compile_to_rows("int a; int b; int main() { int x = a & b; int y = a | b; }").unwrap();
    assert_contains_sequence(&rows, &["and r2, r2, r3"]);
    let or_row = rows.iter().find(|row| row.starts_with("or ")).unwrap();
    assert!(or_row.starts_with("or r"));
}

#[test]
fn negation_of_a_variable() {
    let rows = compile_to_rows("int a; int main() { int z = -a; }").unwrap();
    assert_contains_sequence(&rows, &["ld[2] r2, r2, 0", "neg r2, r2"]);
}

#[test]
fn logical_not_compares_with_zero() {
    let rows = compile_to_rows("int a; int main() { int z = !a; }").unwrap();
    assert_contains_sequence(
        &rows,
        &[
            "cmpi r2, 0",
            "breq L1",
            "addi r2, NULL, 0",
            "jmp L2",
            "L1:",
            "addi r2, NULL, 1",
            "L2:",
        ],
    );
}

#[test]
fn parenthesised_subexpressions_group_first() {
    let rows = compile_to_rows("int a; int b; int main() { int z = (a + b) * 2; }").unwrap();
    let add = test_utils::row_index(&rows, "add ");
    let mult = test_utils::row_index(&rows, "mult ");
    assert!(add < mult);
}

#[test]
fn wide_constant_in_immediate_position_is_an_error() {
    let error = test_utils::compile_to_asm("int a; int main() { int z = a + 70000; }").unwrap_err();
    assert!(error.to_string().contains("wider than 16 bits"));
}
