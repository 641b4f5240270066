//! Basic construction, cloning and release tests for cbrc.

use std::collections::{BTreeSet, HashSet};

use cbrc::{make_shared, SharedPtr};

#[test]
fn test_basic_allocation() {
    let x = SharedPtr::new(42);
    assert_eq!(*x, 42);
    assert_eq!(SharedPtr::use_count(&x), 1);
    assert_eq!(SharedPtr::weak_count(&x), 0);
}

#[test]
fn test_deref() {
    let x = SharedPtr::new(String::from("hello"));
    assert_eq!(&*x, "hello");
    assert_eq!(x.len(), 5);
}

#[test]
fn test_clone_shares_pointee() {
    let x = SharedPtr::new(42);
    let y = SharedPtr::clone(&x);
    assert!(SharedPtr::ptr_eq(&x, &y));
    assert!(SharedPtr::owner_eq(&x, &y));
    assert_eq!(SharedPtr::as_ptr(&x), SharedPtr::as_ptr(&y));
}

#[test]
fn test_use_count_tracks_live_handles() {
    let x = SharedPtr::new(42);
    let handles: Vec<_> = (0..9).map(|_| SharedPtr::clone(&x)).collect();
    assert_eq!(SharedPtr::use_count(&x), 10);

    drop(handles);
    assert_eq!(SharedPtr::use_count(&x), 1);
}

#[test]
fn test_move_keeps_count() {
    let x = SharedPtr::new(vec![1, 2, 3]);
    let y = x;
    assert_eq!(SharedPtr::use_count(&y), 1);

    let boxed = Box::new(y);
    assert_eq!(SharedPtr::use_count(&boxed), 1);
}

#[test]
fn test_from_box() {
    let x = SharedPtr::from_box(Box::new(7_u64));
    assert_eq!(*x, 7);

    let s: SharedPtr<str> = SharedPtr::from(Box::<str>::from("unsized"));
    assert_eq!(&*s, "unsized");

    let slice: SharedPtr<[i32]> = SharedPtr::from_box(vec![1, 2, 3].into_boxed_slice());
    assert_eq!(slice.len(), 3);
    assert_eq!(slice[2], 3);
}

#[test]
fn test_new_with_initializer() {
    let x = SharedPtr::new_with(|| (0..4).collect::<Vec<u8>>());
    assert_eq!(*x, vec![0, 1, 2, 3]);
}

#[test]
fn test_make_shared_and_from_value() {
    let a = make_shared(1.5_f64);
    let b = SharedPtr::from(1.5_f64);
    assert_eq!(a, b);
    assert!(!SharedPtr::ptr_eq(&a, &b));
}

#[test]
fn test_reset_leaves_empty() {
    let mut x = SharedPtr::new(1);
    let y = SharedPtr::clone(&x);
    SharedPtr::reset(&mut x);

    assert!(SharedPtr::is_empty(&x));
    assert_eq!(SharedPtr::use_count(&x), 0);
    assert_eq!(SharedPtr::use_count(&y), 1);
}

#[test]
fn test_get_on_engaged_and_empty() {
    let x = SharedPtr::new(3);
    assert_eq!(SharedPtr::get(&x), Some(&3));

    let empty: SharedPtr<i32> = SharedPtr::null();
    assert_eq!(SharedPtr::get(&empty), None);
}

#[test]
fn test_get_mut_requires_unique_access() {
    let mut x = SharedPtr::new(String::from("a"));
    SharedPtr::get_mut(&mut x).unwrap().push('b');
    assert_eq!(&*x, "ab");

    let weak = SharedPtr::downgrade(&x);
    assert!(SharedPtr::get_mut(&mut x).is_none());
    drop(weak);
    assert!(SharedPtr::get_mut(&mut x).is_some());

    let mut empty: SharedPtr<String> = SharedPtr::default();
    assert!(SharedPtr::get_mut(&mut empty).is_none());
}

#[test]
fn test_hash_and_ord_follow_pointee() {
    let set: HashSet<SharedPtr<i32>> = [1, 2, 2, 3].into_iter().map(SharedPtr::new).collect();
    assert_eq!(set.len(), 3);

    let ordered: BTreeSet<SharedPtr<&str>> = ["b", "a", "c"].into_iter().map(SharedPtr::new).collect();
    let collected: Vec<&str> = ordered.iter().map(|p| **p).collect();
    assert_eq!(collected, ["a", "b", "c"]);
}

#[test]
fn test_formatting() {
    let x = SharedPtr::new(12);
    assert_eq!(format!("{x}"), "12");
    assert_eq!(format!("{x:?}"), "SharedPtr(12)");

    let addr = SharedPtr::as_ptr(&x).unwrap();
    assert_eq!(format!("{x:p}"), format!("{addr:p}"));

    let empty: SharedPtr<i32> = SharedPtr::null();
    assert_eq!(format!("{empty}"), "<empty>");
}

#[test]
fn test_as_ref_and_borrow() {
    use std::borrow::Borrow;

    let x = SharedPtr::new(String::from("key"));
    let r: &String = x.as_ref();
    let b: &String = x.borrow();
    assert!(std::ptr::eq(r, b));
}

#[test]
fn test_many_size_classes() {
    let small = SharedPtr::new(1_u8);
    let medium = SharedPtr::new([7_u64; 16]);
    let large = SharedPtr::new([3_u8; 8192]);
    assert_eq!(*small, 1);
    assert_eq!(medium[15], 7);
    assert_eq!(large[8191], 3);
}

#[test]
fn test_zero_sized_pointee() {
    struct Unit;

    let a = SharedPtr::new(Unit);
    let b = SharedPtr::new(());
    let c = SharedPtr::clone(&a);
    assert_eq!(SharedPtr::use_count(&a), 2);
    assert_eq!(SharedPtr::use_count(&b), 1);
    assert!(!SharedPtr::owner_eq(&a, &b));
    drop(c);
}
