use embedded_hal::serial::nb::Write;
use embedded_hal::serial::ErrorKind;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SerialError();

impl embedded_hal::serial::Error for SerialError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

pub enum FakeWrite {
    Success(),
    Error(),
    AsyncSuccess(),
}

/// A serial port that accepts every byte unless scripted otherwise.
///
/// Scripted writes are consumed one per byte, in order. An `AsyncSuccess` reports `WouldBlock`
/// once before taking the byte.
pub struct Serial {
    writes: Vec<FakeWrite>,
    current_write: Option<FakeWrite>,
    written_data: Vec<u8>,
    flushes: usize,
}

impl Serial {
    pub fn new() -> Serial {
        Serial::with_writes(vec![])
    }

    pub fn with_writes(writes: Vec<FakeWrite>) -> Serial {
        Serial {
            writes,
            current_write: None,
            written_data: Vec::new(),
            flushes: 0,
        }
    }

    pub fn get_written_data(&self) -> &[u8] {
        self.written_data.as_slice()
    }

    pub fn text(&self) -> String {
        String::from_utf8(self.written_data.clone()).unwrap()
    }

    /// Every complete line written so far, without terminators.
    pub fn lines(&self) -> Vec<String> {
        let text = self.text();
        let mut lines: Vec<String> = text.split("\r\n").map(String::from).collect();
        // Whatever follows the last terminator is not a complete line.
        lines.pop();
        lines
    }

    pub fn flushes(&self) -> usize {
        self.flushes
    }
}

impl Write<u8> for Serial {
    type Error = SerialError;

    fn write(&mut self, word: u8) -> nb::Result<(), SerialError> {
        if self.current_write.is_none() && !self.writes.is_empty() {
            self.current_write = Some(self.writes.remove(0));
            if let Some(FakeWrite::AsyncSuccess()) = self.current_write {
                return Err(nb::Error::WouldBlock);
            }
        }
        match self.current_write.take() {
            Some(FakeWrite::Error()) => Err(nb::Error::Other(SerialError())),
            _ => {
                self.written_data.push(word);
                Ok(())
            }
        }
    }

    fn flush(&mut self) -> nb::Result<(), SerialError> {
        self.flushes += 1;
        Ok(())
    }
}
