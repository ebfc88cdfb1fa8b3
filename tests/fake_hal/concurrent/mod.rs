use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::Mutex;

// Read cursors keyed by pin name, so `InputPin` reads can advance through `&self` while tests run
// on parallel threads.
lazy_static! {
    static ref READ_CURSORS: Mutex<HashMap<&'static str, usize>> = Mutex::new(HashMap::new());
}

pub fn reset_cursor(name: &'static str) {
    let mut cursors = READ_CURSORS.lock().unwrap();
    cursors.insert(name, 0);
}

pub fn next_index(name: &str) -> usize {
    let mut cursors = READ_CURSORS.lock().unwrap();
    let index = cursors.get_mut(name).unwrap();
    *index += 1;
    *index - 1
}
