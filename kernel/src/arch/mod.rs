//! Interface com a plataforma: linhas de IRQ.

pub mod irq;
