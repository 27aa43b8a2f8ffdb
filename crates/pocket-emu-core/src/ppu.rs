use std::sync::Arc;

use log::debug;

use crate::publishing::FrameSlot;

#[cfg(feature = "ppu-trace")]
macro_rules! ppu_trace {
    ($($arg:tt)*) => {
        log::trace!($($arg)*);
    };
}
#[cfg(not(feature = "ppu-trace"))]
macro_rules! ppu_trace {
    ($($arg:tt)*) => {};
}

// Screen resolution used by the Game Boy PPU
pub const SCREEN_WIDTH: usize = 160;
pub const SCREEN_HEIGHT: usize = 144;

// Timing in T-cycles
pub const REFRESH_PERIOD: u64 = 70224;
const LINE_CYCLES: u64 = 456;
const OAM_SCAN_END: u64 = 80;
const TRANSFER_END: u64 = 252;
const TOTAL_LINES: u64 = 154;
const LCD_START_DELAY: u64 = 244;

// Sprite limits
const MAX_SPRITES_PER_LINE: usize = 10;
const TOTAL_SPRITES: usize = 40;

const VRAM_SIZE: usize = 0x2000;
const OAM_SIZE: usize = 0xA0;

// VRAM layout
const BG_MAP_0_BASE: usize = 0x1800;
const BG_MAP_1_BASE: usize = 0x1C00;
const TILE_DATA_0_BASE: usize = 0x0000;
const TILE_DATA_1_BASE: usize = 0x0800;

// LCD modes reported in STAT
pub const MODE_HBLANK: u8 = 0;
pub const MODE_VBLANK: u8 = 1;
pub const MODE_OAM: u8 = 2;
pub const MODE_TRANSFER: u8 = 3;

const LCDC_ENABLE: u8 = 0x80;
const LCDC_WINDOW_MAP: u8 = 0x40;
const LCDC_WINDOW_ENABLE: u8 = 0x20;
const LCDC_TILE_DATA: u8 = 0x10;
const LCDC_BG_MAP: u8 = 0x08;
const LCDC_TALL_SPRITES: u8 = 0x04;
const LCDC_SPRITES: u8 = 0x02;
const LCDC_BG_ENABLE: u8 = 0x01;

const STAT_LYC_IRQ: u8 = 0x40;
const STAT_OAM_IRQ: u8 = 0x20;
const STAT_VBLANK_IRQ: u8 = 0x10;
const STAT_HBLANK_IRQ: u8 = 0x08;
const STAT_WRITABLE: u8 = 0x78;

pub const VBLANK_INTERRUPT: u8 = 0x01;
pub const STAT_INTERRUPT: u8 = 0x02;

pub const WHITE: u32 = 0xFFFF_FFFF;

/// One complete picture, 0xAARRGGBB per pixel.
#[derive(Clone)]
pub struct RenderedFrame {
    pub pixels: [u32; SCREEN_WIDTH * SCREEN_HEIGHT],
}

impl Default for RenderedFrame {
    fn default() -> Self {
        Self {
            pixels: [WHITE; SCREEN_WIDTH * SCREEN_HEIGHT],
        }
    }
}

impl RenderedFrame {
    pub fn pixel(&self, x: usize, y: usize) -> u32 {
        self.pixels[y * SCREEN_WIDTH + x]
    }

    pub fn clear(&mut self) {
        self.pixels.fill(WHITE);
    }
}

/// Grey level for a 2-bit shade, 0 being white.
fn shade_to_argb(shade: u8) -> u32 {
    let c = !((shade as u32 * 0xFF / 3) as u8) as u32;
    0xFF00_0000 | c << 16 | c << 8 | c
}

#[derive(Copy, Clone, Default)]
struct Sprite {
    x: i16,
    y: i16,
    tile: u8,
    flags: u8,
    oam_index: usize,
}

impl Sprite {
    fn behind_background(&self) -> bool {
        self.flags & 0x80 != 0
    }

    fn flip_y(&self) -> bool {
        self.flags & 0x40 != 0
    }

    fn flip_x(&self) -> bool {
        self.flags & 0x20 != 0
    }

    fn palette(&self) -> usize {
        ((self.flags >> 4) & 1) as usize
    }
}

/// A point in the refresh period where the PPU changes what it is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowState {
    OamScan(u8),
    Transfer(u8),
    HBlank(u8),
    /// Start of a line inside the vertical blank.
    VBlank(u8),
}

impl RowState {
    fn at(display_clock: u64) -> Self {
        let cycle = display_clock % REFRESH_PERIOD;
        let row = cycle / LINE_CYCLES;
        let sub = cycle % LINE_CYCLES;
        let ly = row as u8;
        if row >= SCREEN_HEIGHT as u64 {
            RowState::VBlank(ly)
        } else if sub < OAM_SCAN_END {
            RowState::OamScan(ly)
        } else if sub < TRANSFER_END {
            RowState::Transfer(ly)
        } else {
            RowState::HBlank(ly)
        }
    }

    /// Display clock of the first transition strictly after `display_clock`.
    fn next_event_after(display_clock: u64) -> u64 {
        let cycle = display_clock % REFRESH_PERIOD;
        let base = display_clock - cycle;
        let row = cycle / LINE_CYCLES;
        let sub = cycle % LINE_CYCLES;
        let line_start = base + row * LINE_CYCLES;
        if row >= SCREEN_HEIGHT as u64 {
            if row + 1 < TOTAL_LINES {
                line_start + LINE_CYCLES
            } else {
                base + REFRESH_PERIOD
            }
        } else if sub < OAM_SCAN_END {
            line_start + OAM_SCAN_END
        } else if sub < TRANSFER_END {
            line_start + TRANSFER_END
        } else {
            line_start + LINE_CYCLES
        }
    }

    fn mode(self) -> u8 {
        match self {
            RowState::OamScan(_) => MODE_OAM,
            RowState::Transfer(_) => MODE_TRANSFER,
            RowState::HBlank(_) => MODE_HBLANK,
            RowState::VBlank(_) => MODE_VBLANK,
        }
    }
}

/// Display controller. Nothing here runs per cycle: [`Ppu::update`] receives
/// the system clock and walks every transition that happened since the last
/// call.
pub struct Ppu {
    pub vram: [u8; VRAM_SIZE],
    pub oam: [u8; OAM_SIZE],

    lcdc: u8,
    stat: u8,
    scy: u8,
    scx: u8,
    lyc: u8,
    pub dma: u8,
    bgp: u8,
    obp0: u8,
    obp1: u8,
    wy: u8,
    wx: u8,
    /// Window row drawn next. Only lines that showed the window advance it.
    window_line: u8,

    /// Last system clock seen by `update`.
    now: u64,
    /// System clock at which the display clock reads zero.
    display_start: Option<u64>,
    enabled: bool,
    /// Display clock of the next transition to process.
    next_event: u64,
    last_state: Option<RowState>,
    swallow_frames: u32,

    vram_access: bool,
    oam_access: bool,

    frame: Box<RenderedFrame>,
    slot: Arc<FrameSlot<RenderedFrame>>,
    line_sprites: [Sprite; MAX_SPRITES_PER_LINE],
    sprite_count: usize,
    frame_counter: u64,
}

impl Ppu {
    pub fn new(slot: Arc<FrameSlot<RenderedFrame>>) -> Self {
        Self {
            vram: [0; VRAM_SIZE],
            oam: [0; OAM_SIZE],
            lcdc: 0,
            stat: 0,
            scy: 0,
            scx: 0,
            lyc: 0,
            dma: 0xFF,
            bgp: 0,
            obp0: 0,
            obp1: 0,
            wy: 0,
            wx: 0,
            window_line: 0,
            now: 0,
            display_start: None,
            enabled: false,
            next_event: 0,
            last_state: None,
            swallow_frames: 0,
            vram_access: true,
            oam_access: true,
            frame: Box::default(),
            slot,
            line_sprites: [Sprite::default(); MAX_SPRITES_PER_LINE],
            sprite_count: 0,
            frame_counter: 0,
        }
    }

    /// Register values the boot ROM leaves behind.
    pub fn apply_post_boot(&mut self) {
        self.write_reg(0xFF40, 0x91);
        self.write_reg(0xFF47, 0xFC);
    }

    pub fn frame_slot(&self) -> &Arc<FrameSlot<RenderedFrame>> {
        &self.slot
    }

    /// Frames published so far.
    pub fn frames(&self) -> u64 {
        self.frame_counter
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn vram_accessible(&self) -> bool {
        self.vram_access
    }

    pub fn oam_accessible(&self) -> bool {
        self.oam_access
    }

    /// Returns the previous (vram, oam) gating.
    pub fn force_access(&mut self) -> (bool, bool) {
        let prev = (self.vram_access, self.oam_access);
        self.enable_memories();
        prev
    }

    pub fn restore_access(&mut self, (vram, oam): (bool, bool)) {
        self.vram_access = vram;
        self.oam_access = oam;
    }

    fn enable_memories(&mut self) {
        self.vram_access = true;
        self.oam_access = true;
    }

    fn display_clock(&self) -> Option<u64> {
        if !self.enabled {
            return None;
        }
        self.display_start.map(|start| self.now.saturating_sub(start))
    }

    fn current_state(&self) -> Option<RowState> {
        self.display_clock().map(RowState::at)
    }

    pub fn ly(&self) -> u8 {
        match self.current_state() {
            Some(
                RowState::OamScan(ly)
                | RowState::Transfer(ly)
                | RowState::HBlank(ly)
                | RowState::VBlank(ly),
            ) => ly,
            None => 0,
        }
    }

    pub fn mode(&self) -> u8 {
        self.current_state().map_or(MODE_HBLANK, RowState::mode)
    }

    pub fn read_reg(&self, addr: u16) -> u8 {
        match addr {
            0xFF40 => self.lcdc,
            0xFF41 => {
                let coincidence = if self.enabled && self.ly() == self.lyc {
                    0x04
                } else {
                    0
                };
                0x80 | (self.stat & STAT_WRITABLE) | coincidence | self.mode()
            }
            0xFF42 => self.scy,
            0xFF43 => self.scx,
            0xFF44 => self.ly(),
            0xFF45 => self.lyc,
            0xFF46 => self.dma,
            0xFF47 => self.bgp,
            0xFF48 => self.obp0,
            0xFF49 => self.obp1,
            0xFF4A => self.wy,
            0xFF4B => self.wx,
            _ => 0xFF,
        }
    }

    pub fn write_reg(&mut self, addr: u16, val: u8) {
        match addr {
            0xFF40 => {
                self.lcdc = val;
                self.toggle_lcd();
            }
            0xFF41 => self.stat = val & STAT_WRITABLE,
            0xFF42 => self.scy = val,
            0xFF43 => self.scx = val,
            0xFF44 => {}
            0xFF45 => self.lyc = val,
            0xFF46 => self.dma = val,
            0xFF47 => self.bgp = val,
            0xFF48 => self.obp0 = val,
            0xFF49 => self.obp1 = val,
            0xFF4A => self.wy = val,
            0xFF4B => self.wx = val,
            _ => {}
        }
    }

    fn toggle_lcd(&mut self) {
        let enable = self.lcdc & LCDC_ENABLE != 0;
        let scheduled = self.enabled || self.display_start.is_some();
        if enable == scheduled {
            return;
        }
        if enable {
            debug!("LCD on at clock {}", self.now);
            self.display_start = Some(self.now + LCD_START_DELAY);
            self.swallow_frames = 1;
        } else {
            debug!("LCD off at clock {}", self.now);
            self.enabled = false;
            self.display_start = None;
            self.last_state = None;
            self.enable_memories();
            self.frame.clear();
            self.slot.publish(&mut self.frame);
            self.frame.clear();
        }
    }

    /// Catch up with `now`. Returns true when the display left VBlank, which
    /// marks a frame boundary.
    pub fn update(&mut self, now: u64, if_reg: &mut u8) -> bool {
        self.now = now;
        let Some(start) = self.display_start else {
            return false;
        };
        if !self.enabled {
            if now < start {
                return false;
            }
            self.enabled = true;
            self.next_event = 0;
            self.last_state = None;
            self.window_line = 0;
        }

        let clock = now - start;
        let mut frame_boundary = false;
        while self.next_event <= clock {
            let state = RowState::at(self.next_event);
            if matches!(state, RowState::OamScan(0))
                && matches!(self.last_state, Some(RowState::VBlank(_)))
            {
                frame_boundary = true;
            }
            self.enter(state, if_reg);
            self.last_state = Some(state);
            self.next_event = RowState::next_event_after(self.next_event);
        }
        frame_boundary
    }

    fn check_lyc(&self, ly: u8, if_reg: &mut u8) {
        if ly == self.lyc && self.stat & STAT_LYC_IRQ != 0 {
            *if_reg |= STAT_INTERRUPT;
        }
    }

    fn enter(&mut self, state: RowState, if_reg: &mut u8) {
        ppu_trace!("PPU {:?} at clock {}", state, self.now);
        match state {
            RowState::OamScan(ly) => {
                self.oam_access = false;
                if self.stat & STAT_OAM_IRQ != 0 {
                    *if_reg |= STAT_INTERRUPT;
                }
                self.check_lyc(ly, if_reg);
            }
            RowState::Transfer(ly) => {
                self.vram_access = false;
                self.oam_access = false;
                if self.swallow_frames == 0 {
                    self.render_scanline(ly);
                }
            }
            RowState::HBlank(_) => {
                self.enable_memories();
                if self.stat & STAT_HBLANK_IRQ != 0 {
                    *if_reg |= STAT_INTERRUPT;
                }
            }
            RowState::VBlank(ly) => {
                if ly == SCREEN_HEIGHT as u8 {
                    self.window_line = 0;
                    if self.swallow_frames == 0 {
                        self.slot.publish(&mut self.frame);
                        self.frame_counter += 1;
                    } else {
                        self.swallow_frames -= 1;
                    }
                    if self.stat & STAT_VBLANK_IRQ != 0 {
                        *if_reg |= STAT_INTERRUPT;
                    }
                    *if_reg |= VBLANK_INTERRUPT;
                }
                self.check_lyc(ly, if_reg);
            }
        }
    }

    #[inline(always)]
    fn dmg_shade(palette: u8, color_id: u8) -> u8 {
        (palette >> (color_id * 2)) & 0x03
    }

    fn tile_data_addr(&self, tile_index: u8) -> usize {
        if self.lcdc & LCDC_TILE_DATA != 0 {
            TILE_DATA_0_BASE + tile_index as usize * 16
        } else {
            TILE_DATA_1_BASE + ((tile_index as i8 as i16 + 128) as usize) * 16
        }
    }

    fn tile_color(&self, addr: usize, tile_x: usize, tile_y: usize) -> u8 {
        let lo = self.vram[addr + tile_y * 2];
        let hi = self.vram[addr + tile_y * 2 + 1];
        let bit = 7 - tile_x;
        ((hi >> bit) & 1) << 1 | ((lo >> bit) & 1)
    }

    /// Sprites overlapping line `ly`, highest priority first: lower X wins,
    /// then lower OAM index.
    fn select_sprites(&mut self, ly: u8) {
        self.sprite_count = 0;
        if self.lcdc & LCDC_SPRITES == 0 {
            return;
        }
        let height: i16 = if self.lcdc & LCDC_TALL_SPRITES != 0 { 16 } else { 8 };
        let mut found = [Sprite::default(); TOTAL_SPRITES];
        let mut count = 0;
        for i in 0..TOTAL_SPRITES {
            let base = i * 4;
            let y = self.oam[base] as i16 - 16;
            if (ly as i16) < y || (ly as i16) >= y + height {
                continue;
            }
            found[count] = Sprite {
                y,
                x: self.oam[base + 1] as i16 - 8,
                tile: self.oam[base + 2],
                flags: self.oam[base + 3],
                oam_index: i,
            };
            count += 1;
        }
        let found = &mut found[..count];
        found.sort_by_key(|s| (s.x, s.oam_index));
        self.sprite_count = count.min(MAX_SPRITES_PER_LINE);
        self.line_sprites[..self.sprite_count].copy_from_slice(&found[..self.sprite_count]);
    }

    /// Colour index and palette of the first opaque sprite pixel at `x`.
    fn sprite_pixel(&self, x: i16, ly: u8) -> Option<(u8, &Sprite)> {
        let tall = self.lcdc & LCDC_TALL_SPRITES != 0;
        let height: i16 = if tall { 16 } else { 8 };
        for s in &self.line_sprites[..self.sprite_count] {
            if x < s.x || x >= s.x + 8 {
                continue;
            }
            let mut line = ly as i16 - s.y;
            if s.flip_y() {
                line = height - 1 - line;
            }
            let mut tile_x = (x - s.x) as usize;
            if s.flip_x() {
                tile_x = 7 - tile_x;
            }
            let tile = if tall { s.tile & 0xFE } else { s.tile } as usize;
            let addr = tile * 16 + (line as usize >> 3) * 16;
            let color_id = self.tile_color(addr, tile_x, line as usize & 7);
            if color_id != 0 {
                return Some((color_id, s));
            }
        }
        None
    }

    fn render_scanline(&mut self, ly: u8) {
        if ly as usize >= SCREEN_HEIGHT {
            return;
        }
        self.select_sprites(ly);

        let bg_enabled = self.lcdc & LCDC_BG_ENABLE != 0;
        let bg_map = if self.lcdc & LCDC_BG_MAP != 0 {
            BG_MAP_1_BASE
        } else {
            BG_MAP_0_BASE
        };
        let window_map = if self.lcdc & LCDC_WINDOW_MAP != 0 {
            BG_MAP_1_BASE
        } else {
            BG_MAP_0_BASE
        };
        let window_line = self.window_line as usize;
        let window_enabled = bg_enabled && self.lcdc & LCDC_WINDOW_ENABLE != 0 && ly >= self.wy;
        let wx = self.wx as i16 - 7;
        let mut window_drawn = false;
        let src_y = (ly as usize + self.scy as usize) & 0xFF;

        for x in 0..SCREEN_WIDTH {
            // colour index before the palette, None when nothing covers x
            let mut bg_color: Option<u8> = None;

            let window_x = x as i16 - wx;
            if window_enabled && window_x >= 0 {
                let (wx, wy) = (window_x as usize, window_line);
                let tile_index = self.vram[window_map + (wy / 8) * 32 + wx / 8];
                let addr = self.tile_data_addr(tile_index);
                bg_color = Some(self.tile_color(addr, wx % 8, wy % 8));
                window_drawn = true;
            } else if bg_enabled {
                let src_x = (x + self.scx as usize) & 0xFF;
                let tile_index = self.vram[bg_map + (src_y / 8) * 32 + src_x / 8];
                let addr = self.tile_data_addr(tile_index);
                bg_color = Some(self.tile_color(addr, src_x % 8, src_y % 8));
            }

            let raw = bg_color.unwrap_or(0);
            let mut pixel = match bg_color {
                Some(id) => shade_to_argb(Self::dmg_shade(self.bgp, id)),
                None => WHITE,
            };
            if let Some((color_id, sprite)) = self.sprite_pixel(x as i16, ly)
                && !(sprite.behind_background() && raw != 0)
            {
                let palette = if sprite.palette() == 1 {
                    self.obp1
                } else {
                    self.obp0
                };
                pixel = shade_to_argb(Self::dmg_shade(palette, color_id));
            }
            self.frame.pixels[ly as usize * SCREEN_WIDTH + x] = pixel;
        }
        if window_drawn {
            self.window_line = self.window_line.wrapping_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_ppu() -> (Ppu, u8) {
        let mut ppu = Ppu::new(Arc::new(FrameSlot::new()));
        let mut if_reg = 0;
        ppu.write_reg(0xFF40, 0x91);
        ppu.update(LCD_START_DELAY, &mut if_reg);
        (ppu, if_reg)
    }

    #[test]
    fn display_waits_for_startup_delay() {
        let mut ppu = Ppu::new(Arc::new(FrameSlot::new()));
        let mut if_reg = 0;
        ppu.write_reg(0xFF40, 0x80);
        ppu.update(LCD_START_DELAY - 4, &mut if_reg);
        assert!(!ppu.is_enabled());
        assert_eq!(ppu.read_reg(0xFF44), 0);
        ppu.update(LCD_START_DELAY, &mut if_reg);
        assert!(ppu.is_enabled());
        assert_eq!(ppu.mode(), MODE_OAM);
        assert!(!ppu.oam_accessible());
    }

    #[test]
    fn first_frame_is_swallowed() {
        let (mut ppu, mut if_reg) = enabled_ppu();
        let start = LCD_START_DELAY;
        let mut boundaries = 0;
        let mut t = start;
        while t < start + 2 * REFRESH_PERIOD {
            t += 4;
            if ppu.update(t, &mut if_reg) {
                boundaries += 1;
            }
        }
        assert_eq!(boundaries, 2);
        assert_eq!(ppu.frames(), 1);
        assert!(ppu.frame_slot().get_public().is_some());
    }

    #[test]
    fn lyc_match_raises_stat_when_enabled() {
        let (mut ppu, _) = enabled_ppu();
        ppu.write_reg(0xFF45, 2);
        ppu.write_reg(0xFF41, STAT_LYC_IRQ);
        let mut if_reg = 0;
        ppu.update(LCD_START_DELAY + LINE_CYCLES, &mut if_reg);
        assert_eq!(if_reg & STAT_INTERRUPT, 0);
        ppu.update(LCD_START_DELAY + 2 * LINE_CYCLES, &mut if_reg);
        assert_eq!(if_reg & STAT_INTERRUPT, STAT_INTERRUPT);
        assert_eq!(ppu.read_reg(0xFF41) & 0x04, 0x04);
    }

    #[test]
    fn stat_bit7_and_lcd_off_state() {
        let (mut ppu, _) = enabled_ppu();
        ppu.write_reg(0xFF41, 0xFF);
        assert_eq!(ppu.read_reg(0xFF41) & 0xF8, 0xF8);
        ppu.write_reg(0xFF40, 0x00);
        assert_eq!(ppu.read_reg(0xFF44), 0);
        assert_eq!(ppu.read_reg(0xFF41) & 0x03, MODE_HBLANK);
        assert!(ppu.vram_accessible() && ppu.oam_accessible());
        let frame = ppu.frame_slot().get_public().unwrap();
        assert!(frame.pixels.iter().all(|&p| p == WHITE));
    }

    #[test]
    fn sprites_sorted_by_x_then_index_and_capped() {
        let (mut ppu, _) = enabled_ppu();
        ppu.write_reg(0xFF40, 0x93);
        for i in 0..12 {
            let base = i * 4;
            ppu.oam[base] = 16;
            ppu.oam[base + 1] = if i == 11 { 8 } else { 100 - i as u8 };
        }
        ppu.select_sprites(0);
        assert_eq!(ppu.sprite_count, MAX_SPRITES_PER_LINE);
        let order: Vec<usize> = ppu.line_sprites[..ppu.sprite_count]
            .iter()
            .map(|s| s.oam_index)
            .collect();
        assert_eq!(order, vec![11, 10, 9, 8, 7, 6, 5, 4, 3, 2]);
    }

    #[test]
    fn background_uses_signed_tile_data_when_bit4_clear() {
        let (mut ppu, _) = enabled_ppu();
        ppu.write_reg(0xFF40, 0x81);
        ppu.write_reg(0xFF47, 0xE4);
        // tile 0 in the 0x8800 area lives at 0x9000
        ppu.vram[0x1000] = 0xFF;
        ppu.vram[0x1001] = 0xFF;
        ppu.render_scanline(0);
        assert_eq!(ppu.frame.pixel(0, 0), shade_to_argb(3));

        ppu.write_reg(0xFF40, 0x91);
        ppu.render_scanline(0);
        assert_eq!(ppu.frame.pixel(0, 0), WHITE);
    }

    #[test]
    fn sprite_behind_nonzero_background_is_hidden() {
        let (mut ppu, _) = enabled_ppu();
        ppu.write_reg(0xFF40, 0x93);
        ppu.write_reg(0xFF47, 0xE4);
        ppu.write_reg(0xFF48, 0xE4);
        // background tile 0 row 0: colour 1 on the left half
        ppu.vram[0] = 0xF0;
        // sprite tile 1 row 0: colour 2 everywhere
        ppu.vram[16 + 1] = 0xFF;
        ppu.oam[..4].copy_from_slice(&[16, 8, 1, 0x80]);

        ppu.render_scanline(0);
        assert_eq!(ppu.frame.pixel(0, 0), shade_to_argb(1));
        assert_eq!(ppu.frame.pixel(4, 0), shade_to_argb(2));
    }

    #[test]
    fn hidden_window_resumes_at_next_row() {
        let (mut ppu, _) = enabled_ppu();
        ppu.write_reg(0xFF47, 0xE4);
        ppu.write_reg(0xFF4A, 0);
        ppu.write_reg(0xFF4B, 7);
        // tile 0: rows 0 and 2 colour 3, row 1 colour 0
        ppu.vram[..2].copy_from_slice(&[0xFF, 0xFF]);
        ppu.vram[4..6].copy_from_slice(&[0xFF, 0xFF]);

        ppu.write_reg(0xFF40, 0xB1);
        ppu.render_scanline(0);
        assert_eq!(ppu.frame.pixel(0, 0), shade_to_argb(3));

        ppu.write_reg(0xFF40, 0x91);
        ppu.render_scanline(1);

        ppu.write_reg(0xFF40, 0xB1);
        ppu.render_scanline(2);
        assert_eq!(ppu.frame.pixel(0, 2), shade_to_argb(0));
        ppu.render_scanline(3);
        assert_eq!(ppu.frame.pixel(0, 3), shade_to_argb(3));
    }
}
