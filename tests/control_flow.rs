use test_utils::{assert_contains_sequence, compile_to_rows, row_index};

#[test]
fn if_without_else_branches_over_the_body() {
    let rows = compile_to_rows("int main() { int x = 1; if (x == 1) x = 2; }").unwrap();

    // The condition materialises 0/1 (L1/L2), then the if tests it.
    assert_contains_sequence(&rows, &["cmpi r2, 0", "breq L3"]);

    let branch = row_index(&rows, "breq L3");
    let store = row_index(&rows, "str[2]");
    let join = row_index(&rows, "L3:");
    assert!(branch < store && store < join);
}

#[test]
fn if_else_has_two_arms_and_a_join() {
    let rows =
        compile_to_rows("int main() { int x = 1; if (x == 1) x = 2; else x = 3; }").unwrap();

    let else_branch = row_index(&rows, "breq L3");
    let skip = row_index(&rows, "jmp L4");
    let else_label = row_index(&rows, "L3:");
    let join = row_index(&rows, "L4:");
    assert!(else_branch < skip && skip < else_label && else_label < join);
}

#[test]
fn while_loop_tests_at_the_top_and_jumps_back() {
    let rows = compile_to_rows("int main() { int i = 0; while (i < 10) i = i + 1; }").unwrap();

    let top = row_index(&rows, "L1:");
    let exit = row_index(&rows, "breq L2");
    let back = row_index(&rows, "jmp L1");
    let end = row_index(&rows, "L2:");
    assert!(top < exit && exit < back && back < end);

    // The comparison sits between loop head and exit branch.
    let cmp = row_index(&rows, "cmpi");
    assert!(top < cmp && cmp < exit);
}

#[test]
fn while_condition_reloads_its_operands() {
    let rows = compile_to_rows("int main() { int i = 0; while (i < 10) i = i + 1; }").unwrap();

    // The load of `i` must sit after the loop head so every iteration
    // re-reads the frame.
    let top = row_index(&rows, "L1:");
    let load = rows
        .iter()
        .enumerate()
        .position(|(i, row)| i > top && row.starts_with("ld[2]"))
        .unwrap();
    let exit = row_index(&rows, "breq L2");
    assert!(top < load && load < exit);
}

#[test]
fn empty_block_emits_no_stack_adjustment() {
    let rows = compile_to_rows("int main() { { } }").unwrap();
    assert_eq!(rows, vec!["main:".to_string(), "ret".to_string()]);
}

#[test]
fn nested_block_locals_accumulate_in_the_frame() {
    let rows = compile_to_rows("int main() { int a = 1; { int b = 2; } }").unwrap();

    // Inner and outer block each free their own two bytes.
    assert_contains_sequence(&rows, &["addi SP, SP, 2", "addi SP, SP, 2", "ret"]);

    // The inner local lives below the outer one.
    assert_contains_sequence(&rows, &["addi r3, NULL, 2", "push[2] r3"]);
}

#[test]
fn return_moves_the_value_and_returns() {
    let rows = compile_to_rows("int f() { return 41 + 1; }").unwrap();
    assert_contains_sequence(&rows, &["addi r2, NULL, 41", "addi r2, r2, 1", "move RV, r2", "ret"]);
}

#[test]
fn if_condition_error_is_positioned() {
    let error = test_utils::compile_to_asm("int main() {\n  if (x ==) x = 1;\n}").unwrap_err();
    assert!(error.to_string().contains("if statement"));
}
