use embassy_futures::join::join;
use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_stm32::usart::{BufferedUart, Config as UartConfig, DataBits, Parity, StopBits};
use embassy_time::{Duration, Timer};
use embedded_io_async::{Read, Write};
use static_cell::StaticCell;

use crate::console::{self, FrameChannel, LineAssembler, LineChannel, MAX_REPLY_LEN};

const CONSOLE_BAUD: u32 = 115_200;
const CONSOLE_BUFFER_SIZE: usize = MAX_REPLY_LEN;

static UART_TX_BUFFER: StaticCell<[u8; CONSOLE_BUFFER_SIZE]> = StaticCell::new();
static UART_RX_BUFFER: StaticCell<[u8; CONSOLE_BUFFER_SIZE]> = StaticCell::new();

embassy_stm32::bind_interrupts!(struct UartIrqs {
    USART2_LPUART2 => embassy_stm32::usart::BufferedInterruptHandler<hal::peripherals::USART2>;
});

#[embassy_executor::task]
pub async fn run(
    lines: &'static LineChannel,
    frames: &'static FrameChannel,
    usart: Peri<'static, hal::peripherals::USART2>,
    tx_pin: Peri<'static, hal::peripherals::PA2>,
    rx_pin: Peri<'static, hal::peripherals::PA3>,
) -> ! {
    let mut config = UartConfig::default();
    config.baudrate = CONSOLE_BAUD;
    config.data_bits = DataBits::DataBits8;
    config.stop_bits = StopBits::STOP1;
    config.parity = Parity::ParityNone;

    let uart = match BufferedUart::new(
        usart,
        rx_pin,
        tx_pin,
        UART_TX_BUFFER.init([0; CONSOLE_BUFFER_SIZE]),
        UART_RX_BUFFER.init([0; CONSOLE_BUFFER_SIZE]),
        UartIrqs,
        config,
    ) {
        Ok(uart) => uart,
        Err(_) => {
            defmt::error!("console: UART init failed");
            loop {
                core::future::pending::<()>().await;
            }
        }
    };

    let (mut uart_tx, mut uart_rx) = uart.split();
    let line_sender = lines.sender();
    let frame_receiver = frames.receiver();

    let uart_to_lines = async move {
        let mut assembler = LineAssembler::new();
        let mut ingress = [0u8; 32];
        loop {
            match uart_rx.read(&mut ingress).await {
                Ok(count) => {
                    for &byte in &ingress[..count] {
                        match assembler.push(byte) {
                            Ok(Some(line)) => {
                                if line_sender.try_send(line).is_err() {
                                    defmt::warn!("console: dropping line (queue full)");
                                }
                            }
                            Ok(None) => {}
                            Err(error) => defmt::warn!("console: {}", error),
                        }
                    }
                }
                Err(_) => {
                    defmt::warn!("console: UART read error");
                    Timer::after(Duration::from_millis(5)).await;
                }
            }
        }
    };

    let frames_to_uart = async move {
        loop {
            let frame = frame_receiver.receive().await;
            if uart_tx.write_all(frame.as_bytes()).await.is_err() {
                defmt::warn!("console: UART write error");
            } else if uart_tx.flush().await.is_err() {
                defmt::warn!("console: UART flush error");
            }

            if frame_receiver.is_empty() {
                console::mark_tx_idle();
            }
        }
    };

    join(uart_to_lines, frames_to_uart).await;
    loop {
        core::future::pending::<()>().await;
    }
}
