use test_utils::{assert_contains_sequence, compile_to_rows};

#[test]
fn constant_folded_global() {
    let rows = compile_to_rows("int x = 2 + 3;").unwrap();
    assert_contains_sequence(&rows, &["x:", ".dh 5"]);
}

#[test]
fn global_without_initialiser_is_zero() {
    let rows = compile_to_rows("int x;").unwrap();
    assert_contains_sequence(&rows, &["x:", ".dh 0"]);
}

#[test]
fn global_directive_matches_type_size() {
    let rows = compile_to_rows("char c = 'A'; int i = 2; long l = 70000;").unwrap();
    assert_contains_sequence(&rows, &["c:", ".db 65"]);
    assert_contains_sequence(&rows, &["i:", ".dh 2"]);
    assert_contains_sequence(&rows, &["l:", ".dw 70000"]);
}

#[test]
fn global_pointer_is_address_sized() {
    let rows = compile_to_rows("long *p;").unwrap();
    assert_contains_sequence(&rows, &["p:", ".dh 0"]);
}

#[test]
fn global_initialiser_folds_unary_and_relational() {
    let rows = compile_to_rows("int a = -5; int b = !0; int c = 2 < 3;").unwrap();
    assert_contains_sequence(&rows, &["a:", ".dh -5"]);
    assert_contains_sequence(&rows, &["b:", ".dh 1"]);
    assert_contains_sequence(&rows, &["c:", ".dh 1"]);
}

#[test]
fn folding_is_left_associative() {
    // 10 - 4 - 3 must fold as (10 - 4) - 3.
    let rows = compile_to_rows("int x = 10 - 4 - 3;").unwrap();
    assert_contains_sequence(&rows, &["x:", ".dh 3"]);
}

#[test]
fn sized_global_array_reserves_zeroed_cells() {
    let rows = compile_to_rows("int a[3];").unwrap();
    assert_contains_sequence(&rows, &["a:", ".dh 0", ".dh 0", ".dh 0"]);
}

#[test]
fn init_list_global_array() {
    let rows = compile_to_rows("int b[] = { 1 2 3 };").unwrap();
    assert_contains_sequence(&rows, &["b:", ".dh 1", ".dh 2", ".dh 3"]);
}

#[test]
fn string_global_array_is_nul_terminated() {
    let rows = compile_to_rows("char s[] = \"ab\";").unwrap();
    assert_contains_sequence(&rows, &["s:", ".db 97", ".db 98", ".db 0"]);
}

#[test]
fn string_array_decodes_escapes() {
    let rows = compile_to_rows("char s[] = \"a\\n\";").unwrap();
    assert_contains_sequence(&rows, &["s:", ".db 97", ".db 10", ".db 0"]);
}

#[test]
fn non_static_global_initialiser_is_an_error() {
    let error = test_utils::compile_to_asm("int f(); int x = f();").unwrap_err();
    assert!(error.to_string().contains("Non-static initialiser"));
}

#[test]
fn non_static_init_list_entry_is_an_error() {
    let error = test_utils::compile_to_asm("int y; int a[] = { y };").unwrap_err();
    assert!(error
        .to_string()
        .contains("Non-static value in array initializer list"));
}
