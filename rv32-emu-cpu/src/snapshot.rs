//! Machine snapshots: the register file, the materialized pages and the
//! symbol cache, as plain serializable data.

use serde::{Deserialize, Serialize};

use rv32_emu_mem::{PageAttributes, PAGE_SHIFT, PAGE_SIZE};
use rv32_emu_regs::Regs;

use crate::machine::Machine;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SerializedPage {
    pub pageno: u32,
    pub attr: u8,
    pub data: Vec<u8>,
}

/// A point-in-time snapshot of one machine. MMIO trap callbacks are not
/// captured; the embedder re-installs them after [`Machine::restore`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SerializedMachine {
    pub regs: Regs,
    pub pages: Vec<SerializedPage>,
    pub symbols: Vec<(String, u32)>,
    pub exit_address: u32,
}

impl Machine {
    pub fn serialize(&self) -> SerializedMachine {
        let mut pages: Vec<SerializedPage> = self
            .memory
            .store()
            .iter()
            .map(|(pageno, page)| SerializedPage {
                pageno,
                attr: page.attr.bits(),
                data: page.data.0.to_vec(),
            })
            .collect();
        pages.sort_by_key(|page| page.pageno);
        SerializedMachine {
            regs: self.cpu.regs,
            pages,
            symbols: self
                .memory
                .symbol_cache()
                .map(|(name, addr)| (name.to_owned(), addr))
                .collect(),
            exit_address: self.memory.exit_address(),
        }
    }

    pub fn restore(&mut self, snapshot: &SerializedMachine) {
        self.cpu.regs = snapshot.regs;
        self.memory.reset();
        self.memory.set_exit_address(snapshot.exit_address);
        for page in &snapshot.pages {
            let base = page.pageno << PAGE_SHIFT;
            self.memory.memcpy(base, &page.data);
            self.memory.set_page_attr(
                base,
                PAGE_SIZE,
                PageAttributes::from_bits_truncate(page.attr),
            );
        }
        for (name, addr) in &snapshot.symbols {
            self.memory.cache_symbol(name, *addr);
        }
    }
}
