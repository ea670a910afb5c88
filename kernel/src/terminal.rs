//! Virtual terminals
//!
//! Three terminals share the one physical text console.  Exactly one is
//! the *foreground* terminal (its cells are on the visible page and it
//! receives keystrokes); exactly one is the *processing* terminal (its
//! process is on the CPU).  The two are independent: a background
//! terminal's process keeps writing into its own back buffer while the
//! user looks at another terminal.
//!
//! Write discipline: output for the foreground terminal goes to both the
//! console page and that terminal's back buffer; output for a background
//! terminal touches only its back buffer and a hidden cursor.  A terminal
//! switch copies the console into the outgoing terminal's back buffer,
//! copies the incoming one's back buffer onto the console, and remaps the
//! user video alias pages for both.
//!
//! All terminal state lives behind one lock that is only ever taken with
//! interrupts masked, because the keyboard and timer handlers take it too.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use spin::Mutex;

use crate::arch;
use crate::paging;
use crate::vga::{self, TextPage, ATTR, NUM_COLS, NUM_ROWS};

pub const NUM_TERMINALS: usize = 3;
pub const KBD_BUF_LEN: usize = 128;

/// Per-terminal state: cursor, line-input buffers, and process accounting.
pub struct Terminal {
    pub id: usize,
    pub cursor_x: usize,
    pub cursor_y: usize,
    pub kbd_buf: [u8; KBD_BUF_LEN],
    pub kbd_buf_copy: [u8; KBD_BUF_LEN],
    pub kbd_buf_count: usize,
    /// Pid of the terminal's innermost running program.
    pub cur_pid: Option<u32>,
    /// Programs nested on this terminal (shell plus children).
    pub num_processes: u32,
}

impl Terminal {
    const fn new(id: usize) -> Self {
        Self {
            id,
            cursor_x: 0,
            cursor_y: 0,
            kbd_buf: [0; KBD_BUF_LEN],
            kbd_buf_copy: [0; KBD_BUF_LEN],
            kbd_buf_count: 0,
            cur_pid: None,
            num_processes: 0,
        }
    }

    /// Appends a typed character.  The last buffer slot stays reserved for
    /// the newline `terminal_read` appends, so at most 127 characters
    /// accumulate.
    fn push_input(&mut self, c: u8) -> bool {
        if self.kbd_buf_count < KBD_BUF_LEN - 1 {
            self.kbd_buf[self.kbd_buf_count] = c;
            self.kbd_buf_count += 1;
            true
        } else {
            false
        }
    }

    /// Drops the most recent typed character, if any.
    fn pop_input(&mut self) -> bool {
        if self.kbd_buf_count == 0 {
            return false;
        }
        self.kbd_buf_count -= 1;
        self.kbd_buf[self.kbd_buf_count] = 0;
        true
    }

    /// Latches the current line for `terminal_read` and resets the input
    /// buffer.
    fn latch_line(&mut self) {
        self.kbd_buf_copy = self.kbd_buf;
        self.kbd_buf = [0; KBD_BUF_LEN];
        self.kbd_buf_count = 0;
    }
}

static TERMINALS: Mutex<[Terminal; NUM_TERMINALS]> =
    Mutex::new([Terminal::new(0), Terminal::new(1), Terminal::new(2)]);

/// Foreground terminal index: owns the visible page and the keyboard.
static RUNNING: AtomicUsize = AtomicUsize::new(0);

/// Processing terminal index: the one whose process is on the CPU.
static PROCESSING: AtomicUsize = AtomicUsize::new(0);

/// Enter latches, one per terminal.  Set by the keyboard handler when a
/// line is complete; cleared by the blocked reader.  Kept outside the
/// terminal lock so `terminal_read` can poll without taking it.
static ENTER_FLAGS: [AtomicBool; NUM_TERMINALS] =
    [AtomicBool::new(false), AtomicBool::new(false), AtomicBool::new(false)];

/// Runs `f` with the terminal table locked and interrupts masked.
pub fn with_terminals<R>(f: impl FnOnce(&mut [Terminal; NUM_TERMINALS]) -> R) -> R {
    arch::without_interrupts(|| f(&mut TERMINALS.lock()))
}

pub fn running() -> usize {
    RUNNING.load(Ordering::Acquire)
}

pub fn processing() -> usize {
    PROCESSING.load(Ordering::Acquire)
}

pub fn set_processing(index: usize) {
    PROCESSING.store(index, Ordering::Release);
}

/// Clears every terminal, resets cursors and buffers, and maps the user
/// video alias pages: the foreground page aliases the console, the other
/// two alias their back buffers.
pub fn init() {
    arch::without_interrupts(|| {
        TextPage::console().clear();
        for i in 0..NUM_TERMINALS {
            TextPage::back_buffer(i).clear();
        }

        let mut terminals = TERMINALS.lock();
        for (i, term) in terminals.iter_mut().enumerate() {
            *term = Terminal::new(i);
            ENTER_FLAGS[i].store(false, Ordering::Release);
        }

        RUNNING.store(0, Ordering::Release);
        PROCESSING.store(0, Ordering::Release);

        paging::set_user_video(0, vga::CONSOLE_PHYS);
        for i in 1..NUM_TERMINALS {
            paging::set_user_video(i, vga::back_buffer_phys(i));
        }

        vga::update_cursor(0, 0);
        vga::draw_status_bar(0);
    });
    crate::log!("terminals up, foreground 0");
}

/// Scrolls the foreground terminal: the console page and the back buffer
/// move together, one page per call.
fn scroll_foreground(index: usize) {
    TextPage::console().scroll_up();
    TextPage::back_buffer(index).scroll_up();
}

/// Echo one character on the foreground terminal, handling deferred line
/// wrap and scrolling.
fn putc_locked(terminals: &mut [Terminal; NUM_TERMINALS], c: u8) {
    let run = running();
    let term = &mut terminals[run];

    if term.cursor_x >= NUM_COLS {
        if term.cursor_y == NUM_ROWS - 1 {
            scroll_foreground(run);
            term.cursor_y -= 1;
        }
        term.cursor_x = 0;
        term.cursor_y += 1;
    }

    TextPage::console().put(term.cursor_x, term.cursor_y, c, ATTR);
    term.cursor_x += 1;

    vga::update_cursor(term.cursor_x, term.cursor_y);
}

/// Buffers and echoes a visible character typed on the foreground
/// terminal.  A full input buffer swallows the keystroke.
pub fn input_char(c: u8) {
    with_terminals(|terminals| {
        let run = running();
        if terminals[run].push_input(c) {
            putc_locked(terminals, c);
        }
    });
}

/// Prints a string on the foreground terminal (prompts, banners).
pub fn print_str(s: &[u8]) {
    with_terminals(|terminals| {
        for &c in s {
            putc_locked(terminals, c);
        }
    });
}

/// Prints a message on the foreground terminal and moves to a fresh line.
pub fn print_banner(s: &[u8]) {
    with_terminals(|terminals| {
        for &c in s {
            putc_locked(terminals, c);
        }
        let run = running();
        let term = &mut terminals[run];
        if term.cursor_y == NUM_ROWS - 1 {
            scroll_foreground(run);
            term.cursor_y -= 1;
        }
        term.cursor_x = 0;
        term.cursor_y += 1;
        vga::update_cursor(term.cursor_x, term.cursor_y);
    });
}

/// Handles Backspace on the foreground terminal: removes the last buffered
/// character and blanks its cell, unwrapping across a row boundary.
pub fn backspace() {
    with_terminals(|terminals| {
        let run = running();
        let term = &mut terminals[run];
        if !term.pop_input() {
            return;
        }
        if term.cursor_x != 0 {
            term.cursor_x -= 1;
        } else {
            term.cursor_x = NUM_COLS - 1;
            term.cursor_y = term.cursor_y.saturating_sub(1);
        }
        TextPage::console().put(term.cursor_x, term.cursor_y, b' ', ATTR);
        vga::update_cursor(term.cursor_x, term.cursor_y);
    });
}

/// Handles Enter on the foreground terminal: advances to a fresh line,
/// latches the input buffer, and raises the terminal's enter latch.
pub fn enter() {
    with_terminals(|terminals| {
        let run = running();
        let term = &mut terminals[run];
        if term.cursor_y == NUM_ROWS - 1 {
            scroll_foreground(run);
            term.cursor_y -= 1;
        }
        term.cursor_x = 0;
        term.cursor_y += 1;
        vga::update_cursor(term.cursor_x, term.cursor_y);

        term.latch_line();
        ENTER_FLAGS[run].store(true, Ordering::Release);
    });
}

/// Ctrl+L: blanks the foreground terminal (console page and back buffer),
/// homes the cursor, and drops any pending input.
pub fn clear_active() {
    with_terminals(|terminals| {
        let run = running();
        TextPage::console().clear();
        TextPage::back_buffer(run).clear();
        let term = &mut terminals[run];
        term.cursor_x = 0;
        term.cursor_y = 0;
        term.kbd_buf = [0; KBD_BUF_LEN];
        term.kbd_buf_count = 0;
        vga::update_cursor(0, 0);
    });
}

/// Blocking line read for the *processing* terminal.
///
/// Busy-polls that terminal's enter latch with interrupts enabled; the
/// scheduler keeps preempting the poll, so other terminals make progress.
/// Returns the latched line with a newline appended.
pub fn read(buf: &mut [u8]) -> isize {
    if buf.is_empty() {
        return 0;
    }
    loop {
        let p = processing();
        if ENTER_FLAGS[p].swap(false, Ordering::AcqRel) {
            break;
        }
        core::hint::spin_loop();
    }

    with_terminals(|terminals| {
        let term = &terminals[processing()];
        let limit = buf.len().saturating_sub(1).min(KBD_BUF_LEN - 1);
        let mut count = 0;
        while count < limit && term.kbd_buf_copy[count] != 0 {
            buf[count] = term.kbd_buf_copy[count];
            count += 1;
        }
        buf[count] = b'\n';
        (count + 1) as isize
    })
}

/// Writes bytes for the *processing* terminal.
///
/// `\n` and `\r` start a new row.  When the processing terminal is the
/// foreground, cells land on the console page and its back buffer; when it
/// is in the background, only the back buffer and its hidden cursor move.
/// Returns the byte count.
pub fn write(buf: &[u8]) -> isize {
    with_terminals(|terminals| {
        let run = running();
        let proc = processing();
        let foreground = run == proc;
        let back = TextPage::back_buffer(proc);
        let term = &mut terminals[proc];

        for &c in buf {
            if c == b'\n' || c == b'\r' {
                term.cursor_y += 1;
                if term.cursor_y >= NUM_ROWS {
                    term.cursor_y -= 1;
                    if foreground {
                        scroll_foreground(proc);
                    } else {
                        back.scroll_up();
                    }
                }
                term.cursor_x = 0;
            } else {
                back.put(term.cursor_x, term.cursor_y, c, ATTR);
                if foreground {
                    TextPage::console().put(term.cursor_x, term.cursor_y, c, ATTR);
                }
                term.cursor_x += 1;
                if term.cursor_x >= NUM_COLS {
                    term.cursor_x = 0;
                    term.cursor_y += 1;
                    if term.cursor_y >= NUM_ROWS {
                        term.cursor_y -= 1;
                        if foreground {
                            scroll_foreground(proc);
                        } else {
                            back.scroll_up();
                        }
                    }
                }
            }
            if foreground {
                vga::update_cursor(term.cursor_x, term.cursor_y);
            }
        }
        buf.len() as isize
    })
}

/// Brings terminal `id` to the foreground.
///
/// Switching to the terminal that is already foreground is a no-op: no
/// buffer movement, no cursor change.
pub fn switch(id: usize) {
    if id >= NUM_TERMINALS {
        return;
    }
    arch::without_interrupts(|| {
        let old = RUNNING.load(Ordering::Acquire);
        if id == old {
            return;
        }

        let console = TextPage::console();
        TextPage::back_buffer(old).copy_from(&console);
        paging::set_user_video(old, vga::back_buffer_phys(old));
        console.copy_from(&TextPage::back_buffer(id));
        paging::set_user_video(id, vga::CONSOLE_PHYS);

        RUNNING.store(id, Ordering::Release);

        let terminals = TERMINALS.lock();
        vga::update_cursor(terminals[id].cursor_x, terminals[id].cursor_y);
        drop(terminals);
        vga::draw_status_bar(id);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vga::Cell;

    fn console_row(y: usize) -> [u8; NUM_COLS] {
        let console = TextPage::console();
        let mut row = [0u8; NUM_COLS];
        for (x, slot) in row.iter_mut().enumerate() {
            *slot = console.get(x, y).ch;
        }
        row
    }

    #[test]
    fn typing_backspace_enter_latches_the_line() {
        let _guard = crate::testing::lock();
        init();

        input_char(b'a');
        input_char(b'b');
        input_char(b'c');
        backspace();
        enter();

        with_terminals(|terminals| {
            let term = &terminals[0];
            assert_eq!(term.kbd_buf_count, 0);
            assert_eq!(&term.kbd_buf_copy[..3], b"ab\0");
        });

        // Latched line comes back with a newline appended.
        let mut buf = [0u8; 16];
        let count = read(&mut buf);
        assert_eq!(count, 3);
        assert_eq!(&buf[..3], b"ab\n");
    }

    #[test]
    fn foreground_write_hits_console_and_back_buffer() {
        let _guard = crate::testing::lock();
        init();

        assert_eq!(write(b"hi"), 2);

        let console = TextPage::console();
        let back = TextPage::back_buffer(0);
        assert_eq!(console.get(0, 0).ch, b'h');
        assert_eq!(console.get(1, 0).ch, b'i');
        assert_eq!(back.get(0, 0).ch, b'h');
        assert_eq!(back.get(1, 0).ch, b'i');
        with_terminals(|terminals| {
            assert_eq!(terminals[0].cursor_x, 2);
            assert_eq!(terminals[0].cursor_y, 0);
        });
    }

    #[test]
    fn background_write_leaves_the_console_alone() {
        let _guard = crate::testing::lock();
        init();
        set_processing(1);

        write(b"x");

        assert_eq!(TextPage::console().get(0, 0), Cell::BLANK);
        assert_eq!(TextPage::back_buffer(1).get(0, 0).ch, b'x');
        with_terminals(|terminals| {
            assert_eq!(terminals[1].cursor_x, 1);
        });
        set_processing(0);
    }

    #[test]
    fn write_scrolls_when_the_last_row_overflows() {
        let _guard = crate::testing::lock();
        init();

        for i in 0..NUM_ROWS {
            let line = [b'0' + (i % 10) as u8, b'\n'];
            write(&line);
        }
        // Row 0 held '0'; after one scroll it holds '1'.
        assert_eq!(console_row(0)[0], b'1');
        with_terminals(|terminals| {
            assert_eq!(terminals[0].cursor_y, NUM_ROWS - 1);
            assert_eq!(terminals[0].cursor_x, 0);
        });
    }

    #[test]
    fn switch_swaps_pages_and_is_idempotent() {
        let _guard = crate::testing::lock();
        init();

        write(b"zero");
        switch(1);

        // Terminal 0's output was parked in its back buffer.
        assert_eq!(TextPage::back_buffer(0).get(0, 0).ch, b'z');
        // The console now shows terminal 1's (blank) content.
        assert_eq!(TextPage::console().get(0, 0), Cell::BLANK);
        assert_eq!(running(), 1);

        // Switching to the foreground terminal changes nothing.
        let before: [Cell; 4] = core::array::from_fn(|x| TextPage::console().get(x, 0));
        switch(1);
        let after: [Cell; 4] = core::array::from_fn(|x| TextPage::console().get(x, 0));
        assert_eq!(before, after);
        assert_eq!(running(), 1);

        switch(0);
        assert_eq!(TextPage::console().get(0, 0).ch, b'z');
        assert_eq!(running(), 0);
    }

    #[test]
    fn input_buffer_reserves_the_newline_slot() {
        let _guard = crate::testing::lock();
        init();

        for _ in 0..KBD_BUF_LEN + 5 {
            input_char(b'q');
        }
        with_terminals(|terminals| {
            assert_eq!(terminals[0].kbd_buf_count, KBD_BUF_LEN - 1);
        });
    }
}
